use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::error::{IoError, PrepResult};

/// Copies the local log file into `durable_dir`, keeping its file name.
pub fn ship_log(local: &Path, durable_dir: &Path) -> PrepResult<PathBuf> {
    let file_name = local.file_name().ok_or_else(|| IoError::ExternalCopy {
        from: local.to_path_buf(),
        to: durable_dir.to_path_buf(),
        msg: "log path has no file name".to_string(),
    })?;
    let target = durable_dir.join(file_name);

    fs::create_dir_all(durable_dir)
        .and_then(|_| fs::copy(local, &target))
        .map_err(|e| IoError::ExternalCopy {
            from: local.to_path_buf(),
            to: target.clone(),
            msg: e.to_string(),
        })?;

    Ok(target)
}

/// Ships the run's log file when dropped, so every exit path of a run ends
/// with the log in durable storage.
///
/// When the log is written through a non-blocking appender, hand its
/// [`WorkerGuard`] to the ship guard: it is released right before the copy,
/// which flushes the pending lines. Shipping failures are logged and swallowed.
#[must_use = "the log is shipped when the guard is dropped"]
#[derive(Debug)]
pub struct LogShipGuard {
    local: PathBuf,
    durable_dir: PathBuf,
    flush: Option<WorkerGuard>,
    armed: bool,
}

impl LogShipGuard {
    pub fn new(local: impl Into<PathBuf>, durable_dir: impl Into<PathBuf>) -> Self {
        Self {
            local: local.into(),
            durable_dir: durable_dir.into(),
            flush: None,
            armed: true,
        }
    }

    pub fn with_flush_guard(mut self, guard: WorkerGuard) -> Self {
        self.flush = Some(guard);
        self
    }

    /// Ships immediately and disarms the guard.
    pub fn ship_now(mut self) -> PrepResult<PathBuf> {
        self.armed = false;
        self.announce_and_flush();
        ship_log(&self.local, &self.durable_dir)
    }

    /// Logs the destination while the file writer is still attached, then
    /// flushes it, so the shipped copy names where it went.
    fn announce_and_flush(&mut self) {
        let target = match self.local.file_name() {
            Some(name) => self.durable_dir.join(name),
            None => self.durable_dir.clone(),
        };
        info!("Copy log to {}", target.display());
        drop(self.flush.take());
    }
}

impl Drop for LogShipGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.announce_and_flush();

        match ship_log(&self.local, &self.durable_dir) {
            Ok(target) => info!(log = %target.display(), "Log shipped"),
            Err(e) => warn!(error = %e, "Log shipping failed"),
        }
    }
}
