//! Structured logging: console plus an optional daily rolling file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ReconcileError, Result};

pub const LOG_FILE_PREFIX: &str = "cash-register";
pub const MAX_LOG_FILES: usize = 10;

const DEFAULT_FILTER: &str = "info,cash_register=debug";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
///
/// With a `log_dir`, old files are pruned and a daily file layer is added;
/// keep the returned guard alive or buffered lines are lost on exit. Fails
/// with [`ReconcileError::Config`] when a subscriber is already installed.
pub fn init_logging(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|e| {
                ReconcileError::Config(format!("create log dir {}: {e}", dir.display()))
            })?;
            prune_old_logs(dir, MAX_LOG_FILES);

            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()
        .map_err(|e| ReconcileError::Config(format!("install log subscriber: {e}")))?;

    info!("Cash register v{} logging started", env!("CARGO_PKG_VERSION"));
    Ok(guard)
}

/// Keep the `max_files` most recent log files in `dir`, returning how many
/// were removed. Files not written by this crate are left alone.
pub fn prune_old_logs(dir: &Path, max_files: usize) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut log_files: Vec<(PathBuf, SystemTime)> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
        })
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (path, modified)
        })
        .collect();

    // newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(max_files) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn prune_keeps_the_newest_files_and_ignores_foreign_ones() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=5 {
            fs::write(dir.path().join(format!("{LOG_FILE_PREFIX}.2026-03-0{day}")), "x").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        assert_eq!(prune_old_logs(dir.path(), 2), 3);

        let remaining: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.iter().any(|name| name == "notes.txt"));
    }

    #[test]
    fn prune_of_a_missing_dir_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(prune_old_logs(&dir.path().join("absent"), 1), 0);
    }

    #[test]
    #[serial]
    fn subscriber_installs_once() {
        let dir = tempfile::tempdir().unwrap();
        let guard = init_logging(Some(dir.path())).unwrap();
        assert!(guard.is_some());
        tracing::info!("written to the rolling file");

        assert!(matches!(
            init_logging(None),
            Err(ReconcileError::Config(_))
        ));
    }
}
