use std::{
    fs,
    path::{Path, PathBuf},
};

use regex::Regex;
use tracing::{info, warn};

use crate::{
    data::{config::RunTimestamp, table::DatedTable},
    error::{IoError, PrepError, PrepResult},
    io::csv::write_table,
};

/// Where a table ended up after [`persist_with_backup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    pub primary: PathBuf,

    /// `None` when the backup copy could not be written.
    pub backup: Option<PathBuf>,

    /// Backups deleted by rotation, oldest first.
    pub rotated: Vec<PathBuf>,
}

/// `data.csv` stamped with `20240105_093000` becomes `data_20240105_093000.csv`.
pub fn backup_file_name(file_name: &str, timestamp: &RunTimestamp) -> String {
    let (stem, ext) = split_extension(file_name);
    format!("{stem}_{timestamp}{ext}")
}

/// Deletes all but the `keep` most recent timestamped backups of `file_name`
/// in `dir`.
///
/// Backups are the files named `{stem}_*{ext}`. They are ordered by name, which
/// is chronological for `%Y%m%d_%H%M%S` stamps, and the oldest are removed
/// first. Returns the deleted paths. A missing directory holds no backups.
pub fn rotate_backups(dir: &Path, file_name: &str, keep: usize) -> PrepResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = backup_pattern(file_name)?;
    let mut backups = fs::read_dir(dir)
        .map_err(IoError::Io)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| pattern.is_match(name))
        })
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    backups.sort();

    let excess = backups.len().saturating_sub(keep);
    let mut deleted = Vec::with_capacity(excess);
    for path in backups.into_iter().take(excess) {
        fs::remove_file(&path).map_err(|e| {
            IoError::FileSystem(format!("Failed to delete backup {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "Deleted old backup");
        deleted.push(path);
    }

    Ok(deleted)
}

/// Writes `table` to `primary`, copies it to a timestamped file in
/// `backup_dir`, and rotates that directory down to `keep` backups.
///
/// Only the primary write can fail the call. Backup and rotation failures are
/// logged and reflected in the returned outcome.
#[tracing::instrument(skip_all, fields(primary = %primary.display()))]
pub fn persist_with_backup(
    table: &DatedTable,
    primary: &Path,
    backup_dir: &Path,
    timestamp: &RunTimestamp,
    keep: usize,
) -> PrepResult<PersistOutcome> {
    write_table(table, primary)?;
    info!(rows = table.height(), cols = table.width(), "Feature table written");

    let file_name = primary
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            IoError::FileSystem(format!("Output path has no file name: {}", primary.display()))
        })?;

    let backup = match copy_to_backup(primary, backup_dir, file_name, timestamp) {
        Ok(path) => {
            info!(path = %path.display(), "Backup written");
            Some(path)
        }
        Err(e) => {
            warn!(error = %e, "Backup copy failed");
            None
        }
    };

    let rotated = match rotate_backups(backup_dir, file_name, keep) {
        Ok(deleted) => deleted,
        Err(e) => {
            warn!(error = %e, "Backup rotation failed");
            Vec::new()
        }
    };

    Ok(PersistOutcome {
        primary: primary.to_path_buf(),
        backup,
        rotated,
    })
}

// ================================================================================================
// Helper Functions
// ================================================================================================

fn copy_to_backup(
    primary: &Path,
    backup_dir: &Path,
    file_name: &str,
    timestamp: &RunTimestamp,
) -> PrepResult<PathBuf> {
    let target = backup_dir.join(backup_file_name(file_name, timestamp));
    let external = |e: std::io::Error| -> PrepError {
        IoError::ExternalCopy {
            from: primary.to_path_buf(),
            to: target.clone(),
            msg: e.to_string(),
        }
        .into()
    };

    fs::create_dir_all(backup_dir).map_err(external)?;
    fs::copy(primary, &target).map_err(external)?;
    Ok(target)
}

/// Splits at the last dot of the file name; leading dots do not start an extension.
fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(pos) if file_name[..pos].chars().any(|c| c != '.') => file_name.split_at(pos),
        _ => (file_name, ""),
    }
}

fn backup_pattern(file_name: &str) -> PrepResult<Regex> {
    let (stem, ext) = split_extension(file_name);
    let pattern = format!("^{}_.*{}$", regex::escape(stem), regex::escape(ext));
    Regex::new(&pattern).map_err(|e| {
        IoError::FileSystem(format!("Invalid backup pattern for '{file_name}': {e}")).into()
    })
}
