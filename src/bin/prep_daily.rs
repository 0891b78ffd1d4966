use std::{env, fs, path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use dayprep::prelude::*;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Optional JSON deployment replacing the built-in daily configuration.
const CONFIG_ENV: &str = "DAYPREP_CONFIG";

fn main() -> Result<()> {
    let cfg = run_config(RunTimestamp::now())?;
    let (log_file, flush) = init_tracing(&cfg)?;

    // Dropped last: flushes the file writer, then ships the log
    let _ship = LogShipGuard::new(&log_file, &cfg.logs.durable_dir).with_flush_guard(flush);

    let started = Instant::now();
    match run(&cfg) {
        Ok(output) => {
            let summary = RunSummary::success(&output, started.elapsed());
            info!(rows = ?summary.rows, columns = ?summary.columns, "{summary}");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "Unexpected Error");
            let summary = RunSummary::failure(&e, started.elapsed());
            error!("{summary}");
            Err(e).context("Preprocess failed")
        }
    }
}

fn run_config(timestamp: RunTimestamp) -> Result<RunConfig> {
    let cfg = match env::var(CONFIG_ENV) {
        Ok(path) => RunConfig::from_json_file(&path, timestamp)
            .with_context(|| format!("Failed to load run configuration from {path}"))?,
        Err(_) => RunConfig::daily_deployment(timestamp),
    };
    cfg.validate().context("Invalid run configuration")?;
    Ok(cfg)
}

// ================================================================================================
// Tracing Configuration
// ================================================================================================

/// Logs human-readable lines to stdout and JSON lines to the run's log file.
/// Returns the log file path and the guard that flushes it.
fn init_tracing(cfg: &RunConfig) -> Result<(PathBuf, WorkerGuard)> {
    let log_dir = &cfg.logs.local_dir;
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_name = cfg.logs.file_name(&cfg.timestamp);
    let file_path = log_dir.join(&file_name);
    let file_appender = tracing_appender::rolling::never(log_dir, &file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_span_events(fmt::format::FmtSpan::NONE)
        .with_current_span(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    info!(log_file = %file_path.display(), timestamp = %cfg.timestamp, "Logging to file");
    Ok((file_path, guard))
}
