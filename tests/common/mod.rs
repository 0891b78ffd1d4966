#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use dayprep::prelude::*;

pub fn raw_fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/raw")
}

/// The production daily deployment, reading the fixture files and writing
/// into `out_dir`.
pub fn fixture_config(out_dir: &Path, stamp: &str) -> RunConfig {
    RunConfig::daily_deployment(RunTimestamp::new(stamp))
        .with_raw_data_dir(raw_fixtures())
        .with_processed_dir(out_dir.join("processed_data"))
        .with_logs(LogConfig {
            local_dir: out_dir.join("logs"),
            durable_dir: out_dir.join("bucket/logs"),
            file_prefix: "log_prep_D".to_string(),
        })
}

pub fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()))
        .lines()
        .map(str::to_string)
        .collect()
}

pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names = fs::read_dir(dir)
        .unwrap_or_else(|e| panic!("Failed to list {}: {e}", dir.display()))
        .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    names
}
