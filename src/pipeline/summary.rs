use std::{fmt, path::PathBuf, time::Duration};

use serde::Serialize;
use strum::{Display, IntoStaticStr};

use crate::{error::PrepError, pipeline::assembler::RunOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
}

/// One-line outcome of a run, logged on every exit path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub rows: Option<usize>,
    pub columns: Option<usize>,
    pub output: Option<PathBuf>,
    pub backup: Option<PathBuf>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn success(output: &RunOutput, elapsed: Duration) -> Self {
        let table = output.feature_table.as_table();
        Self {
            status: RunStatus::Success,
            rows: Some(table.height()),
            columns: Some(table.width()),
            output: Some(output.persisted.primary.clone()),
            backup: output.persisted.backup.clone(),
            error: None,
            elapsed,
        }
    }

    pub fn failure(error: &PrepError, elapsed: Duration) -> Self {
        Self {
            status: RunStatus::Failure,
            rows: None,
            columns: None,
            output: None,
            backup: None,
            error: Some(error.to_string()),
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Whole milliseconds keep the rendering short
        let elapsed = Duration::from_millis(self.elapsed.as_millis() as u64);
        write!(
            f,
            "Preprocess {} in {}",
            self.status,
            humantime::format_duration(elapsed)
        )?;
        if let (Some(rows), Some(columns)) = (self.rows, self.columns) {
            write!(f, ": shape ({rows}, {columns})")?;
        }
        if let Some(output) = &self.output {
            write!(f, ", saved to {}", output.display())?;
        }
        if let Some(error) = &self.error {
            write!(f, ": {error}")?;
        }
        Ok(())
    }
}
