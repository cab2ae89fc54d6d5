//! Aggregate progress counters with invariant repair.
//!
//! The coordinator owns one [`ProgressCounters`] value and mutates it on
//! every outcome. Counters can drift after resuming from a partial snapshot,
//! so every mutation is followed by [`ProgressCounters::validate`], which
//! clamps the value back inside its invariants instead of failing the run.
//!
//! # Invariants
//!
//! - `processed <= total`
//! - `successful + failed <= processed`
//! - `successful + failed + errors <= processed` (`errors` counts recipients
//!   filtered out pre-dispatch, which are included in `processed`)
//! - `active_workers <= worker_count`

use serde::{Deserialize, Serialize};

/// Aggregate counters for one run.
///
/// `errors` counts pre-dispatch matching misses; `failed` counts
/// worker-reported grant failures. Both are included in `processed`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressCounters {
    pub total: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub errors: u64,
    pub active_workers: u64,
}

impl ProgressCounters {
    /// Clamp all counters back inside their invariants.
    ///
    /// Returns `true` if anything was repaired. Repairs are reported on
    /// stderr; they indicate a drifted snapshot, not a fatal condition.
    pub fn validate(&mut self, worker_count: u64) -> bool {
        let mut repaired = false;

        if self.processed > self.total {
            eprintln!(
                "[counters] processed ({}) exceeds total ({}); clamping",
                self.processed, self.total
            );
            self.processed = self.total;
            repaired = true;
        }

        let outcomes = self.successful.saturating_add(self.failed);
        if outcomes > self.processed {
            // Scale both down proportionally (floor) to fit under processed.
            let scaled_successful = self.successful * self.processed / outcomes;
            let scaled_failed = self.failed * self.processed / outcomes;
            eprintln!(
                "[counters] successful+failed ({}) exceeds processed ({}); scaling to {}+{}",
                outcomes, self.processed, scaled_successful, scaled_failed
            );
            self.successful = scaled_successful;
            self.failed = scaled_failed;
            repaired = true;
        }

        if self.active_workers > worker_count {
            eprintln!(
                "[counters] active_workers ({}) exceeds worker count ({}); clamping",
                self.active_workers, worker_count
            );
            self.active_workers = worker_count;
            repaired = true;
        }

        repaired
    }

    /// Percentage of `total` processed, rounded down. Zero when idle.
    pub fn percent(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            self.processed * 100 / self.total
        }
    }

    /// Tasks accounted for but not yet resolved by a worker.
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.processed)
    }
}
