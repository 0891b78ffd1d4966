// 1. Traits
pub use crate::data::polars_ext::{DataFrameExt, ExprExt};
pub use crate::ingest::SeriesFetcher;

// 2. Tables and transforms
pub use crate::data::frequency::Frequency;
pub use crate::data::table::{DEFAULT_INDEX, DatedTable};
pub use crate::transform::{
    lag::{LagSpec, make_lag},
    reconcile::expand_to_daily,
};

// 3. Configuration
pub use crate::data::config::{
    ColumnMapping, LogConfig, RunConfig, RunTimestamp, SourceConfig,
};
pub use crate::data::indicator::{IndicatorSpec, apply_indicators};
pub use crate::ingest::{RefreshJob, extract_measure, refresh_raw_series};

// 4. Pipeline
pub use crate::io::{LogShipGuard, PersistOutcome, persist_with_backup, read_raw_table, write_table};
pub use crate::pipeline::{
    FeatureTable, RunOutput, RunStatus, RunSummary, assemble, merge_feature_table, run,
};

// 5. Errors
pub use crate::error::{ConfigError, DataError, IoError, PrepError, PrepResult};
