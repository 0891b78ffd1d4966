use std::path::PathBuf;

use thiserror::Error;

pub type PrepResult<T> = Result<T, PrepError>;

#[derive(Debug, Error)]
pub enum PrepError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PrepError {
    /// Fatal errors abort a run; everything else is reported and swallowed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Io(IoError::ExternalCopy { .. }))
    }
}

/// Errors related to table contents, parsing, and the feature transforms.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Malformed date in column '{column}' (expected format '{format}'): {msg}")]
    MalformedDate {
        column: String,
        format: String,
        msg: String,
    },

    #[error("Column not found: '{0}'")]
    MissingColumn(String),

    #[error("Invalid lag specification: {0}")]
    InvalidLag(String),

    #[error("Table is empty: {0}")]
    EmptyTable(String),

    #[error("Merged feature table has no complete rows: {0}")]
    EmptyMergeResult(String),

    #[error("Date out of representable range: {0}")]
    DateOutOfRange(String),

    #[error("Data frame error: {0}")]
    DataFrame(String),
}

/// Errors related to file I/O and the external persistence collaborators.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("Raw input file not found: {}", .0.display())]
    MissingInputFile(PathBuf),

    #[error("IO operation failed")]
    Io(#[from] std::io::Error),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Failed to write data: {0}")]
    WriteFailed(String),

    #[error("Failed to read data: {0}")]
    ReadFailed(String),

    #[error("Failed to copy '{}' to '{}': {msg}", .from.display(), .to.display())]
    ExternalCopy {
        from: PathBuf,
        to: PathBuf,
        msg: String,
    },

    #[error("Retrieval of '{source_name}' failed: {msg}")]
    Fetch { source_name: String, msg: String },
}

/// Errors related to the run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse run configuration")]
    Json(#[from] serde_json::Error),

    #[error("No sources configured")]
    NoSources,

    #[error("Invalid run configuration: {0}")]
    Invalid(String),
}

pub(crate) fn polars_to_prep_error(context: &str, e: polars::error::PolarsError) -> PrepError {
    PrepError::Data(DataError::DataFrame(format!("{context}: {e}")))
}
