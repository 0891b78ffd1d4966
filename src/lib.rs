//! Daily feature-table preprocessing.
//!
//! Raw dated series (daily prices, monthly economic indicators) are cleaned,
//! enriched with technical indicators and lag features, reconciled onto a
//! daily calendar, merged, and persisted as one feature table per run.

pub mod data;
pub mod error;
pub mod ingest;
pub mod io;
pub mod pipeline;
pub mod prelude;
pub mod transform;

pub use pipeline::{assemble, run};
