//! Final results artifact.
//!
//! Written once, on clean completion, as a self-contained record of the run:
//! worker configuration, aggregate statistics, the error log, every failed
//! result, and a compact summary of successes. Consumers read this instead
//! of scraping the event stream.

use std::io;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::api::{iso_timestamp, ShareResult};
use crate::config::ShareConfig;
use crate::counters::ProgressCounters;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfigSummary {
    pub workers: usize,
    pub rate_limit_ms: u64,
    pub history_batch: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_processed: u64,
    pub successful_shares: u64,
    pub failed_shares: u64,
    pub error_count: u64,
    /// Wall-clock seconds for the run.
    pub processing_time: f64,
}

/// One successful grant, trimmed to what reporting needs.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessSummary {
    pub row: u32,
    pub name: String,
    pub email: String,
    pub folder_id: String,
    pub permission_id: String,
    pub timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultsFile<'a> {
    timestamp: String,
    worker_config: WorkerConfigSummary,
    statistics: Statistics,
    error_log: &'a [String],
    failed_results: Vec<&'a ShareResult>,
    successful_summary: Vec<SuccessSummary>,
}

/// Write the results artifact.
pub fn write_results(
    path: &Path,
    config: &ShareConfig,
    counters: &ProgressCounters,
    results: &[ShareResult],
    error_log: &[String],
    elapsed: Duration,
) -> io::Result<()> {
    let failed_results: Vec<&ShareResult> = results.iter().filter(|r| !r.success).collect();
    let successful_summary: Vec<SuccessSummary> = results
        .iter()
        .filter(|r| r.success)
        .map(|r| SuccessSummary {
            row: r.recipient.row,
            name: r.recipient.name.clone(),
            email: r.recipient.email.clone(),
            folder_id: r.folder_id.clone().unwrap_or_default(),
            permission_id: r.permission_id.clone().unwrap_or_default(),
            timestamp: r.timestamp.clone(),
        })
        .collect();

    let file = ResultsFile {
        timestamp: iso_timestamp(),
        worker_config: WorkerConfigSummary {
            workers: config.workers,
            rate_limit_ms: config.rate_limit.as_millis() as u64,
            history_batch: config.history_batch,
        },
        statistics: Statistics {
            total_processed: counters.processed,
            successful_shares: counters.successful,
            failed_shares: counters.failed,
            error_count: counters.errors,
            processing_time: elapsed.as_secs_f64(),
        },
        error_log,
        failed_results,
        successful_summary,
    };

    let json = serde_json::to_vec_pretty(&file).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
