//! Logging setup
//!
//! Console output goes to stderr so that stdout stays reserved for the
//! user-facing status lines and tables.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

const LOG_FILE_PREFIX: &str = "driftsync.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable, colored
    Pretty,
    /// JSON structured logging
    Json,
}

/// Default filter when `RUST_LOG` is not set
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "driftsync=info",
        1 => "driftsync=debug",
        _ => "driftsync=trace",
    }
}

/// Install the global subscriber
///
/// When `log_dir` is given, a JSON copy of every event is written to a daily
/// rolling file there. The returned guard flushes that file and must be held
/// until the process exits.
pub fn init_logging(
    format: LogFormat,
    verbosity: u8,
    log_dir: Option<&Path>,
    ansi: bool,
) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbosity)))
        .context("Failed to create env filter")?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    match format {
        LogFormat::Json => layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed()),
        LogFormat::Pretty => layers.push(
            fmt::layer()
                .with_ansi(ansi)
                .with_writer(std::io::stderr)
                .boxed(),
        ),
    }

    let guard = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(fmt::layer().json().with_writer(writer).boxed());
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
