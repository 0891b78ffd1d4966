pub mod config;
pub mod frequency;
pub mod indicator;
pub mod polars_ext;
pub mod table;
