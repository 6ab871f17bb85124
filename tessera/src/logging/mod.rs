//! Logging initialization for tessera using `tracing` and `tracing-subscriber`.
//!
//! Output is controlled by:
//! - `RUST_LOG`: log level filtering, see [`EnvFilter`]
//! - `TESSERA_FORMAT`: output format, see [`LogFormat`]

use std::str::FromStr;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

pub mod progress;

/// Log output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, single-line logs.
    Full,
    /// A variant of the full format, optimized for short line lengths.
    Compact,
    /// Compact, without timestamps, targets or ANSI colors.
    Bare,
    /// Multi-line logs for local debugging.
    Pretty,
    /// Newline-delimited JSON.
    Json,
}

impl LogFormat {
    /// Installs the global subscriber for this format.
    pub fn init(self, env_filter: EnvFilter) {
        let dispatch = match self {
            Self::Full => tracing_subscriber::fmt()
                .with_span_events(FmtSpan::NONE)
                .with_env_filter(env_filter)
                .finish()
                .into(),
            Self::Compact => tracing_subscriber::fmt()
                .compact()
                .with_span_events(FmtSpan::NONE)
                .with_env_filter(env_filter)
                .finish()
                .into(),
            Self::Bare => tracing_subscriber::fmt()
                .compact()
                .with_span_events(FmtSpan::NONE)
                .without_time()
                .with_target(false)
                .with_ansi(false)
                .with_env_filter(env_filter)
                .finish()
                .into(),
            Self::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(env_filter)
                .finish()
                .into(),
            Self::Json => tracing_subscriber::fmt()
                .json()
                .with_span_events(FmtSpan::NONE)
                .with_env_filter(env_filter)
                .finish()
                .into(),
        };
        // `SubscriberInitExt::init` would install a second `LogTracer`.
        tracing::dispatcher::set_global_default(dispatch)
            .expect("failed to set global default subscriber");
    }
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Compact
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "compact" => Ok(Self::Compact),
            "bare" => Ok(Self::Bare),
            "pretty" | "verbose" => Ok(Self::Pretty),
            "json" | "jsonl" => Ok(Self::Json),
            _ => Err(format!(
                "Invalid log format '{s}'. Valid options: json, full, compact, bare or pretty"
            )),
        }
    }
}

fn log_level(level: Level) -> log::LevelFilter {
    match level {
        Level::ERROR => log::LevelFilter::Error,
        Level::WARN => log::LevelFilter::Warn,
        Level::INFO => log::LevelFilter::Info,
        Level::DEBUG => log::LevelFilter::Debug,
        Level::TRACE => log::LevelFilter::Trace,
    }
}

/// Forwards `log` records of dependencies into `tracing`.
fn init_log_bridge(env_filter: &EnvFilter) {
    let mut builder = tracing_log::LogTracer::builder()
        .with_interest_cache(tracing_log::InterestCacheConfig::default());
    if let Some(Some(level)) = env_filter.max_level_hint().map(LevelFilter::into_level) {
        builder = builder.with_max_level(log_level(level));
    }
    builder
        .init()
        .expect("failed to initialize log -> tracing bridge: LogTracer already set");
}

/// Installs the global subscriber with `filter` and the format named by `format`.
///
/// Invalid values fall back to `debug` and the default format, with a warning on stderr.
pub fn init_tracing(filter: &str, format: Option<String>) {
    let env_filter = EnvFilter::from_str(filter).unwrap_or_else(|_| {
        eprintln!("Warning: Invalid filter string '{filter}' passed, using 'debug' instead");
        EnvFilter::new("debug")
    });
    let log_format = format
        .and_then(|s| {
            s.parse::<LogFormat>()
                .map_err(|e| {
                    eprintln!("Warning: {e}");
                    eprintln!("Falling back to default format ({:?})", LogFormat::default());
                })
                .ok()
        })
        .unwrap_or_default();

    init_log_bridge(&env_filter);
    log_format.init(env_filter);
}

/// Extends a `RUST_LOG` value so the core library logs at the same level as the CLI.
///
/// Without `RUST_LOG`, both log at `info`.
#[must_use]
pub fn ensure_core_log_level_matches(env_filter: Option<String>) -> String {
    const CLI: &str = "tessera=";
    const CORE: &str = "tessera_core=";
    match env_filter {
        Some(rust_log) if !rust_log.contains(CORE) => {
            match rust_log.split(',').find_map(|s| s.strip_prefix(CLI)) {
                Some(level) => format!("{rust_log},{CORE}{level}"),
                None => rust_log,
            }
        }
        Some(rust_log) => rust_log,
        None => format!("{CLI}info,{CORE}info"),
    }
}
