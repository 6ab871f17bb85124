//! Command line arguments.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Parser, ValueEnum};
use tessera_tile_utils::{MAX_ZOOM, Rect};

use crate::config::Config;

/// Lowest accepted `--zoom`. Bitmaps usually support less; rendering clamps further.
const MIN_ZOOM_ARG: i64 = -64;

/// Defines the styles used for the CLI help output.
const HELP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Blue.on_default().bold())
    .usage(AnsiColor::Blue.on_default().bold())
    .literal(AnsiColor::White.on_default())
    .placeholder(AnsiColor::Green.on_default());

#[derive(Parser, Debug, PartialEq, Default)]
#[command(
    about,
    version,
    after_help = "Use RUST_LOG environment variable to control logging level, e.g. RUST_LOG=debug or RUST_LOG=tessera_core=trace. Use TESSERA_FORMAT to pick the log format: full, compact, bare, pretty or json.",
    styles = HELP_STYLES
)]
pub struct Args {
    #[command(flatten)]
    pub meta: MetaArgs,
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub pyramid: PyramidArgs,
    #[command(flatten)]
    pub render: RenderArgs,
}

// None of these params will be transferred to the config
#[derive(Parser, Debug, Clone, PartialEq, Default)]
pub struct MetaArgs {
    /// Path to config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Save resulting config to a file or use "-" to print to stdout.
    #[arg(long)]
    pub save_config: Option<PathBuf>,
}

/// Synthetic images generated when no input file is given.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pattern {
    /// Diagonal grey ramp repeating every 256 pixels.
    #[default]
    Gradient,
    /// Alternating 64x64 black and white squares.
    Checkerboard,
    /// Concentric rings around the centre of the image.
    Rings,
}

#[derive(Parser, Debug, Clone, PartialEq, Default)]
pub struct InputArgs {
    /// A binary PGM (P5) file, or a headerless raw bitmap with rows packed MSB first.
    /// Without it, a synthetic pattern is generated.
    pub input: Option<PathBuf>,
    /// Width of a raw input or of the generated pattern, in pixels.
    #[arg(long)]
    pub width: Option<u32>,
    /// Height of a raw input or of the generated pattern, in pixels.
    #[arg(long)]
    pub height: Option<u32>,
    /// Bits per pixel of a raw input or of the generated pattern: 1, 2, 4 or 8.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=8))]
    pub bpp: Option<u32>,
    /// Pattern to generate when there is no input file.
    #[arg(long, value_enum, default_value_t)]
    pub pattern: Pattern,
}

#[derive(Parser, Debug, Clone, PartialEq, Default)]
pub struct PyramidArgs {
    /// Edge length of a tile in pixels, a multiple of 64.
    #[arg(long)]
    pub tile_size: Option<u32>,
    /// Number of CPU-bound worker threads. Defaults to the number of cores.
    #[arg(short = 'j', long)]
    pub threads: Option<NonZeroUsize>,
    /// Keep idle tiles uncompressed.
    #[arg(long)]
    pub no_compress: bool,
    /// zlib level for idle tiles, 0-9.
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=9))]
    pub compression_level: Option<u32>,
}

#[derive(Parser, Debug, Clone, PartialEq, Default)]
pub struct RenderArgs {
    /// Render a viewport into this PNG file once the pyramid is built.
    #[arg(short, long)]
    pub render: Option<PathBuf>,
    /// Zoom level of the rendering. One bitmap pixel covers 2^zoom output pixels per axis.
    #[arg(
        short,
        long,
        default_value_t = 0,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i32).range(MIN_ZOOM_ARG..=i64::from(MAX_ZOOM))
    )]
    pub zoom: i32,
    /// Part of the bitmap to render as `x,y,width,height` in bitmap pixels. Defaults to all of it.
    #[arg(long, value_parser = parse_viewport)]
    pub viewport: Option<Rect>,
    /// Draw sample 0 as white.
    #[arg(long)]
    pub invert: bool,
}

fn parse_viewport(value: &str) -> Result<Rect, String> {
    let parts = value
        .split(',')
        .map(|v| v.trim().parse::<i32>().map_err(|e| format!("'{v}': {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match parts[..] {
        [x, y, width, height] if width > 0 && height > 0 => Ok(Rect::new(x, y, width, height)),
        [_, _, _, _] => Err("width and height must be positive".to_string()),
        _ => Err(format!("expected x,y,width,height but got '{value}'")),
    }
}

impl Args {
    /// Applies the settings given on the command line on top of `config`.
    pub fn merge_into_config(&self, config: &mut Config) {
        if let Some(tile_size) = self.pyramid.tile_size {
            config.pyramid.tile_size = Some(tile_size);
        }
        if let Some(threads) = self.pyramid.threads {
            config.scheduler.cpu_threads = Some(threads);
        }
        if self.pyramid.no_compress {
            config.storage.compress = Some(false);
        }
        if let Some(level) = self.pyramid.compression_level {
            config.storage.compression_level = Some(level);
        }
    }
}
