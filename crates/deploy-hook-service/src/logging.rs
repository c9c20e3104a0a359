//! Console and log-file subscriber setup.

use anyhow::Context;
use deploy_hook_api::LoggingConfig;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CRATE_TARGETS: [&str; 4] = [
    "deploy_hook_service",
    "deploy_hook_api",
    "deploy_hook_core",
    "tower_http",
];

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Returns the log file in
/// use, or `None` when file logging is disabled or the file could not be
/// opened; the latter is reported as a warning once the subscriber is up.
pub fn init(config: &LoggingConfig, build_path: &Path) -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

    let (file_layer, file_path, file_error) = match config.file_path(build_path) {
        Some(path) => match open_log_file(&path) {
            Ok(file) => (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                ),
                Some(path),
                None,
            ),
            Err(e) => (None, None, Some(e)),
        },
        None => (None, None, None),
    };

    let json_layer = config
        .json_format
        .then(|| tracing_subscriber::fmt::layer().json());
    let plain_layer = (!config.json_format).then(|| tracing_subscriber::fmt::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(plain_layer)
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        warn!(error = %format!("{e:#}"), "File logging disabled");
    }

    file_path
}

/// Filter used when `RUST_LOG` is unset.
///
/// A bare level applies to this workspace's crates and `tower_http`; any
/// other value is treated as a complete filter directive.
pub fn default_directive(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    CRATE_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn open_log_file(path: &Path) -> anyhow::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
