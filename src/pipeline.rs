pub mod assembler;
pub mod source;
pub mod summary;

pub use assembler::{FeatureTable, RunOutput, assemble, merge_feature_table, run};
pub use source::prepare_source;
pub use summary::{RunStatus, RunSummary};
