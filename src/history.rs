//! Resume snapshot persistence.
//!
//! The engine checkpoints its state to a single JSON file so a crashed or
//! interrupted run can resume: processed keys, appended results, pending
//! cell updates, the error log, aggregate counters, and the run start time.
//! The file is deleted on clean completion; its presence means "a prior run
//! did not finish flushing".
//!
//! # Durability
//!
//! `save` writes to a temp file in the same directory and renames it over
//! the target, so a crash mid-write never corrupts the previous good
//! snapshot.
//!
//! # Corruption policy
//!
//! A snapshot that fails to parse is logged and ignored (the engine starts
//! fresh). A snapshot that parses but carries impossible counters keeps its
//! processed-keys set and result list (those protect the at-most-once grant
//! guarantee) while the counters alone are rejected and reset to zero.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::api::{CellUpdate, ShareResult};
use crate::counters::ProgressCounters;

// ============================================================================
// Snapshot schema
// ============================================================================

/// Counters as read from disk, before validation.
///
/// Signed fields so a corrupted snapshot with negative values still parses;
/// [`RawCounters::validated`] decides whether the numbers are usable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawCounters {
    pub total: i64,
    pub processed: i64,
    pub successful: i64,
    pub failed: i64,
    pub errors: i64,
    pub active_workers: i64,
}

impl RawCounters {
    pub fn from_counters(c: &ProgressCounters) -> Self {
        Self {
            total: c.total as i64,
            processed: c.processed as i64,
            successful: c.successful as i64,
            failed: c.failed as i64,
            errors: c.errors as i64,
            active_workers: 0,
        }
    }

    /// Accept the counters if they satisfy the load-time invariants,
    /// otherwise reject them (`None`): any negative value,
    /// `processed > total`, or `successful + failed > processed`.
    pub fn validated(&self) -> Option<ProgressCounters> {
        let negative = self.total < 0
            || self.processed < 0
            || self.successful < 0
            || self.failed < 0
            || self.errors < 0
            || self.active_workers < 0;
        if negative
            || self.processed > self.total
            || self.successful + self.failed > self.processed
        {
            return None;
        }
        Some(ProgressCounters {
            total: self.total as u64,
            processed: self.processed as u64,
            successful: self.successful as u64,
            failed: self.failed as u64,
            errors: self.errors as u64,
            active_workers: 0,
        })
    }
}

/// The atomic unit of resume.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistorySnapshot {
    /// When this snapshot was written.
    pub timestamp: String,
    /// Processed-keys set (`"<name>|<email>"`), insertion-ordered.
    pub processed_participants: Vec<String>,
    /// Completion-ordered results so far.
    pub share_results: Vec<ShareResult>,
    /// Cell updates accumulated but not yet flushed.
    pub batch_updates: Vec<CellUpdate>,
    /// Non-fatal diagnostics (worker failures, repairs).
    pub error_log: Vec<String>,
    /// Aggregate counters at snapshot time.
    pub progress_stats: RawCounters,
    /// When the run (or resumed chain of runs) started.
    pub start_time: String,
}

// ============================================================================
// Store
// ============================================================================

/// File-backed snapshot store.
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the prior snapshot, if any.
    ///
    /// Missing file → `None` (fresh run). Unreadable or unparseable file →
    /// logged and `None` (fresh run; the corrupt file will be overwritten by
    /// the next save).
    pub fn load(&self) -> Option<HistorySnapshot> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                eprintln!("[history] cannot read {}: {e}", self.path.display());
                return None;
            }
        };
        match serde_json::from_slice(&data) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                eprintln!(
                    "[history] corrupt snapshot {}: {e}; starting fresh",
                    self.path.display()
                );
                None
            }
        }
    }

    /// Persist a snapshot via temp-file + rename.
    pub fn save(&self, snapshot: &HistorySnapshot) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(snapshot).map_err(io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)
    }

    /// Remove the snapshot. Missing file is not an error.
    pub fn delete(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Recipient;
    use tempfile::TempDir;

    fn sample_snapshot() -> HistorySnapshot {
        HistorySnapshot {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            processed_participants: vec!["Alice|a@x".to_string(), "Bob|b@x".to_string()],
            share_results: vec![ShareResult::granted(
                Recipient {
                    row: 2,
                    email: "a@x".to_string(),
                    name: "Alice".to_string(),
                    is_shared: false,
                    last_log: String::new(),
                },
                "f1".to_string(),
                "p1".to_string(),
            )],
            batch_updates: vec![CellUpdate::status(2, true)],
            error_log: vec![],
            progress_stats: RawCounters {
                total: 4,
                processed: 2,
                successful: 1,
                failed: 0,
                errors: 1,
                active_workers: 0,
            },
            start_time: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));
        let snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.processed_participants, snapshot.processed_participants);
        assert_eq!(loaded.share_results, snapshot.share_results);
        assert_eq!(loaded.batch_updates, snapshot.batch_updates);
        assert_eq!(loaded.progress_stats, snapshot.progress_stats);
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));
        store.save(&sample_snapshot()).unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["history.json"]);
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));
        assert!(store.load().is_none());
        assert!(!store.exists());
    }

    #[test]
    fn garbage_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, b"{not json").unwrap();
        let store = HistoryStore::new(path);
        assert!(store.load().is_none());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));
        store.save(&sample_snapshot()).unwrap();
        store.delete().unwrap();
        assert!(!store.exists());
        store.delete().unwrap();
    }

    #[test]
    fn counters_rejected_when_processed_exceeds_total() {
        let raw = RawCounters {
            total: 5,
            processed: 10,
            ..Default::default()
        };
        assert!(raw.validated().is_none());
    }

    #[test]
    fn counters_rejected_when_outcomes_exceed_processed() {
        let raw = RawCounters {
            total: 10,
            processed: 3,
            successful: 3,
            failed: 1,
            ..Default::default()
        };
        assert!(raw.validated().is_none());
    }

    #[test]
    fn counters_rejected_when_negative() {
        let raw = RawCounters {
            total: 10,
            processed: -1,
            ..Default::default()
        };
        assert!(raw.validated().is_none());
    }

    #[test]
    fn valid_counters_accepted_with_idle_workers() {
        let raw = RawCounters {
            total: 10,
            processed: 4,
            successful: 2,
            failed: 1,
            errors: 1,
            active_workers: 0,
        };
        let c = raw.validated().unwrap();
        assert_eq!(c.processed, 4);
        assert_eq!(c.active_workers, 0);
    }

    #[test]
    fn snapshot_with_unknown_fields_still_parses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        fs::write(
            &path,
            br#"{"timestamp":"t","processedParticipants":["A|a@x"],"futureField":1}"#,
        )
        .unwrap();
        let store = HistoryStore::new(path);
        let snapshot = store.load().unwrap();
        assert_eq!(snapshot.processed_participants, vec!["A|a@x".to_string()]);
        assert_eq!(snapshot.progress_stats, RawCounters::default());
    }
}
