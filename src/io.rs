//! File boundaries of a run: raw tables in, feature tables and logs out.

pub mod backup;
pub mod csv;
pub mod log_ship;

pub use backup::{PersistOutcome, backup_file_name, persist_with_backup, rotate_backups};
pub use csv::{read_raw_table, write_table};
pub use log_ship::{LogShipGuard, ship_log};
