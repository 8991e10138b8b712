use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn env_filter(default_level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("Invalid log filter")
}

/// Logs to stderr so stdout only carries the report. `RUST_LOG` overrides
/// `default_level`.
pub fn init_stderr(default_level: &str) -> Result<()> {
    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter(default_level)?)
        .with(fmt_layer)
        .try_init()
        .context("Failed to install tracing subscriber")
}

/// Logs to stdout and appends to `<logs_dir>/<file_name>`.
///
/// The returned guard flushes the file writer when dropped and must be kept
/// alive for the whole run.
pub fn init_stdout_and_file(
    logs_dir: &Path,
    file_name: &str,
    default_level: &str,
) -> Result<WorkerGuard> {
    fs::create_dir_all(logs_dir)
        .with_context(|| format!("Failed to create log directory {}", logs_dir.display()))?;

    let appender = tracing_appender::rolling::never(logs_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let stdout_layer = fmt::layer().with_target(false);
    let file_layer = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter(default_level)?)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
