use anyhow::{anyhow, Context, Result};
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::{self, Config};

pub const LOG_FILE: &str = "gemchat.log";

/// Installs the global subscriber. The terminal is owned by the UI, so
/// everything goes to `{cache_dir}/gemchat.log`.
///
/// `RUST_LOG` wins over the configured level. Keep the returned guard alive
/// for the life of the program or buffered lines are lost.
pub fn configure_logging(config: &Config) -> Result<WorkerGuard> {
    let dir = config::cache_dir()?;
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(&dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))?;

    Ok(guard)
}
