use std::env;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::log_enabled;
use tessera::TesseraResult;
use tessera::app::build_pyramid;
use tessera::args::Args;
use tessera::config::{Config, read_config};
use tessera::logging::progress::PyramidProgress;
use tessera::logging::{ensure_core_log_level_matches, init_tracing};
use tessera::render::{render, write_png};
use tessera::source::Source;
use tessera_tile_utils::Rect;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound for waiting on render caches.
const RENDER_TIMEOUT: Duration = Duration::from_secs(300);

fn start(args: &Args) -> TesseraResult<()> {
    info!("Starting tessera v{VERSION}");

    let mut config = if let Some(ref cfg_filename) = args.meta.config {
        info!("Using {}", cfg_filename.display());
        read_config(cfg_filename, &subst::Env)?
    } else {
        Config::default()
    };
    args.merge_into_config(&mut config);
    if let Some(ref file_name) = args.meta.save_config {
        config.save_to_file(file_name)?;
    }

    let source = Source::open(&args.input)?;
    let info = source.info();
    info!("Loading a {}x{} bitmap at {} bpp", info.width, info.height, info.bpp);
    let loaded = build_pyramid(
        &config,
        &source,
        args.render.invert,
        Some(Arc::new(PyramidProgress::new())),
    )?;
    let stats = loaded.stats();
    info!(
        "Pyramid ready after {:.2?}: {} blobs, {} bytes resident, {} bytes stored",
        loaded.elapsed, stats.blobs, stats.resident_bytes, stats.stored_bytes
    );

    if let Some(ref png) = args.render.render {
        let viewport = args
            .render
            .viewport
            .unwrap_or_else(|| Rect::from_size(info.width, info.height));
        let surface = render(&loaded.bitmap, viewport, args.render.zoom, RENDER_TIMEOUT);
        write_png(&surface, png)?;
    } else {
        info!("Use --render to write a viewport of the bitmap to a PNG file.");
    }
    Ok(())
}

fn main() {
    let filter = ensure_core_log_level_matches(env::var("RUST_LOG").ok());
    init_tracing(&filter, env::var("TESSERA_FORMAT").ok());

    let args = Args::parse();
    if let Err(e) = start(&args) {
        // Ensure the message is printed, even if the logging is disabled
        if log_enabled!(log::Level::Error) {
            error!("{e}");
        } else {
            eprintln!("{e}");
        }
        std::process::exit(1);
    }
}
