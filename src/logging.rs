//! Tracing setup: stderr always, plus `server.log` in the state directory when serving.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const SERVER_LOG_FILE: &str = "server.log";

/// Keeps the file writer flushing until dropped; hold it for the life of `main`.
#[must_use]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// `RUST_LOG` wins over the built-in default.
fn default_filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose { "buildbay=debug" } else { "buildbay=info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into())
}

/// Install the global subscriber. `file_dir` enables the `server.log` layer.
pub fn init(file_dir: Option<&Path>, verbose: bool) -> LogGuard {
    let (file_layer, guard) = match file_dir.and_then(file_writer) {
        Some((writer, guard)) => (
            Some(fmt::layer().with_writer(writer).with_ansi(false)),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    LogGuard { _file: guard }
}

fn file_writer(dir: &Path) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("Failed to create log directory {}: {}", dir.display(), e);
        return None;
    }
    let appender = tracing_appender::rolling::never(dir, SERVER_LOG_FILE);
    Some(tracing_appender::non_blocking(appender))
}
