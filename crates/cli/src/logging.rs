//! Logging setup
//!
//! Console output goes to stderr so command output on stdout stays clean.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directives (default: `kilosort=info`)
//! - `KILOSORT_LOG_FORMAT`: `pretty` (default) or `json`

use anyhow::{Context, Result};
use std::path::Path;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "kilosort=info";
const LOG_FILE_PREFIX: &str = "kilosort-runner.log";

/// Plain-text layer for the rolling log file
fn file_layer<S>(writer: &Option<NonBlocking>) -> Option<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    writer
        .clone()
        .map(|writer| fmt::layer().with_ansi(false).with_writer(writer))
}

/// Install the global subscriber
///
/// Returns the file writer guard when `log_dir` is set; keep it alive until exit
/// or buffered lines are lost.
pub fn init_logging(format: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("Failed to create env filter")?;

    let (file_writer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    match format {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(file_layer(&file_writer))
                .try_init()
                .context("Failed to install logger")?;
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .with(file_layer(&file_writer))
                .try_init()
                .context("Failed to install logger")?;
        }
    }

    Ok(guard)
}
