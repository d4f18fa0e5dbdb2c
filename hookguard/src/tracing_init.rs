use std::fs::OpenOptions;
use std::path::PathBuf;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};

/// Environment variable overriding the log file path.
pub const LOG_PATH_ENV: &str = "HOOKGUARD_LOG";

/// Environment variable overriding the file log filter (e.g. `hookguard_core=trace`).
pub const LOG_FILTER_ENV: &str = "HOOKGUARD_LOG_LEVEL";

/// Log path: `HOOKGUARD_LOG` > `~/.hookguard/hookguard.log` > `./hookguard.log`.
pub fn log_path() -> PathBuf {
    std::env::var_os(LOG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".hookguard").join("hookguard.log"))
                .unwrap_or_else(|| PathBuf::from("hookguard.log"))
        })
}

/// Stdout carries the hook protocol, so logs only ever go to the log file or
/// stderr. `verbose` mirrors debug output to stderr.
pub fn init_tracing(verbose: bool) {
    let log_path = log_path();

    let log_file = log_path
        .parent()
        .and_then(|parent| std::fs::create_dir_all(parent).ok())
        .and_then(|_| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .ok()
        });

    let file_layer: Option<Box<dyn Layer<_> + Send + Sync>> = log_file.map(|file| {
        let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new(Level::DEBUG.as_str()));
        tracing_subscriber::fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_filter(filter)
            .boxed()
    });

    // Fall back to stderr when the log file can't be opened.
    let stderr_level = match (verbose, file_layer.is_some()) {
        (true, _) => Some(Level::DEBUG),
        (false, false) => Some(Level::WARN),
        (false, true) => None,
    };
    let stderr_layer: Option<Box<dyn Layer<_> + Send + Sync>> = stderr_level.map(|level| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_filter(LevelFilter::from_level(level))
            .boxed()
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init()
}
