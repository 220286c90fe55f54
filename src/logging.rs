//! Tracing setup for the server binary.
//!
//! Events always reach stdout through a compact formatter filtered by
//! `RUST_LOG` (`info` when unset). A second layer appends the same events to a
//! file so crashes leave a trail: `PAPERQUERY_LOG_FILE` names the file,
//! defaulting to `logs/paperquery.log`. File writes go through a non-blocking
//! worker to keep request paths off the disk.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static FILE_WORKER: OnceLock<WorkerGuard> = OnceLock::new();

const DEFAULT_LOG_PATH: &str = "logs/paperquery.log";

/// Install the global subscriber. Call once at startup, before any logging.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_target(false).compact();
    let registry = tracing_subscriber::registry().with(filter).with(stdout);

    match open_log_file() {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let _ = FILE_WORKER.set(guard);
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false).compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

/// Open the log file for appending, creating parent directories as needed.
/// Logging stays stdout-only when the file cannot be opened.
fn open_log_file() -> Option<File> {
    let path = std::env::var("PAPERQUERY_LOG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_PATH));

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        if let Err(error) = std::fs::create_dir_all(parent) {
            eprintln!("Could not create log directory {}: {error}", parent.display());
            return None;
        }
    }

    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some(file),
        Err(error) => {
            eprintln!("Could not open log file {}: {error}", path.display());
            None
        }
    }
}
