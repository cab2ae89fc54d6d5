//! Structured progress events, output sinks, and payload sanitization.
//!
//! # Architecture
//!
//! The coordinator emits tagged, line-delimited events through an
//! [`EventSink`]. Each event is a single line of the form `<TAG>: <payload>`;
//! some payloads are human-readable, some are JSON. A parent process (the
//! web front-end) parses lines by tag and must treat unrecognized lines as
//! plain log output, so events are never allowed to span lines.
//!
//! # Wire hygiene
//!
//! Free-text fields that reach JSON payloads pass through [`sanitize_text`]:
//! control characters, line/paragraph separators, and zero-width characters
//! are stripped and the text is truncated to 100 characters. Whole JSON
//! payloads are capped at 100 KB; an oversize payload is replaced by a
//! `{"error":"Data too large"}` fallback rather than a malformed line.
//!
//! # Sinks
//!
//! The sink is a one-method capability so tests can capture the stream.
//! The stdout sink holds its mutex only for the write, and ignores
//! `BrokenPipe` (the consumer went away; standard CLI behavior).

use std::io::{self, ErrorKind, Write};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::api::ShareResult;
use crate::counters::ProgressCounters;

/// Maximum serialized size of a JSON event payload.
const MAX_JSON_PAYLOAD: usize = 100 * 1024;

/// Maximum length of a free-text field inside a JSON payload.
const MAX_TEXT_FIELD: usize = 100;

/// Maximum number of issues carried by a single `RESULTS_UPDATE`.
const MAX_ISSUES: usize = 50;

// ============================================================================
// Sinks
// ============================================================================

/// Destination for event lines.
///
/// Implementations must be safe to call from the coordinator thread and must
/// append exactly one newline per `emit_line` call.
pub trait EventSink: Send + Sync {
    /// Write one event line (without trailing newline).
    fn emit_line(&self, line: &str);
    /// Flush buffered output.
    fn flush(&self) {}
}

/// Event sink writing to standard output.
///
/// Lines are flushed immediately: the stream is low-rate control traffic
/// consumed live by a parent process, so promptness beats throughput here.
pub struct StdoutSink {
    out: Mutex<io::Stdout>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(io::stdout()),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for StdoutSink {
    fn emit_line(&self, line: &str) {
        let mut out = self.out.lock().expect("stdout sink mutex poisoned");
        let res = out
            .write_all(line.as_bytes())
            .and_then(|()| out.write_all(b"\n"))
            .and_then(|()| out.flush());
        if let Err(e) = res {
            if e.kind() != ErrorKind::BrokenPipe {
                eprintln!("[events] stdout write failed: {e}");
            }
        }
    }
}

/// Collects event lines in memory (for testing).
pub struct VecSink {
    lines: Mutex<Vec<String>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Drain and return all accumulated lines.
    pub fn take(&self) -> Vec<String> {
        let mut lines = self.lines.lock().expect("vec sink mutex poisoned");
        std::mem::take(&mut *lines)
    }

    /// Return accumulated lines without draining.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("vec sink mutex poisoned").clone()
    }
}

impl Default for VecSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecSink {
    fn emit_line(&self, line: &str) {
        self.lines
            .lock()
            .expect("vec sink mutex poisoned")
            .push(line.to_string());
    }
}

// ============================================================================
// Sanitization
// ============================================================================

/// Strip characters that could break line framing or downstream JSON
/// consumers, and truncate to [`MAX_TEXT_FIELD`] characters.
///
/// Removed outright: control characters (including `\n`/`\r`/`\t`), the
/// Unicode line/paragraph separators U+2028/U+2029, zero-width characters
/// (U+200B..=U+200D, U+2060, U+FEFF). Quote/backslash escaping is the JSON
/// encoder's job and is not duplicated here.
pub fn sanitize_text(s: &str) -> String {
    s.chars()
        .filter(|ch| {
            !ch.is_control()
                && !matches!(
                    ch,
                    '\u{2028}' | '\u{2029}' | '\u{200B}'..='\u{200D}' | '\u{2060}' | '\u{FEFF}'
                )
        })
        .take(MAX_TEXT_FIELD)
        .collect()
}

// ============================================================================
// JSON payloads
// ============================================================================

/// Per-outcome throughput snapshot (`SPEED_UPDATE`).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedUpdate {
    /// Outcomes per second over the run so far.
    pub speed: f64,
    pub unit: &'static str,
    pub processed: u64,
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub active_workers: u64,
    pub worker_count: u64,
    /// Estimated seconds to completion at the current rate.
    pub eta: u64,
    pub timestamp: String,
}

/// Aggregate document state after a cache write-through (`DASHBOARD_UPDATE`).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardUpdate {
    pub timestamp: String,
    pub total_participants: u64,
    pub shared_count: u64,
    pub pending_count: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueRow {
    row: u32,
    name: String,
    email: String,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultsUpdate {
    issues: Vec<IssueRow>,
    issue_count: usize,
    truncated_count: usize,
}

// ============================================================================
// Emitter
// ============================================================================

/// Serializes engine progress into the tagged event vocabulary.
///
/// One instance per run, owned by the coordinator. All methods emit exactly
/// one line.
pub struct EventEmitter {
    sink: Arc<dyn EventSink>,
}

impl EventEmitter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub fn stdout() -> Self {
        Self::new(Arc::new(StdoutSink::new()))
    }

    pub fn flush(&self) {
        self.sink.flush();
    }

    pub fn progress(&self, counters: &ProgressCounters) {
        self.sink.emit_line(&format!(
            "PROGRESS: Processed {} / {} ({}%)",
            counters.processed,
            counters.total,
            counters.percent()
        ));
    }

    pub fn status(&self, counters: &ProgressCounters) {
        self.sink.emit_line(&format!(
            "STATUS: {} successful, {} failed, {} errors",
            counters.successful, counters.failed, counters.errors
        ));
    }

    pub fn workers(&self, counters: &ProgressCounters, worker_count: u64, queued: u64) {
        self.sink.emit_line(&format!(
            "WORKERS: {}/{} active, {} in queue",
            counters.active_workers, worker_count, queued
        ));
    }

    pub fn speed(&self, rate: f64, eta_secs: u64) {
        self.sink
            .emit_line(&format!("SPEED: {rate:.2} per second, ETA: {eta_secs}s"));
    }

    pub fn speed_update(&self, update: &SpeedUpdate) {
        self.emit_json("SPEED_UPDATE", update);
    }

    pub fn worker_idle(&self, worker: usize) {
        self.sink
            .emit_line(&format!("WORKER_STATUS: Worker {worker} is now idle"));
    }

    pub fn worker_working(&self, worker: usize, name: &str) {
        self.sink.emit_line(&format!(
            "WORKER_STATUS: Worker {worker} is now working on {}",
            sanitize_text(name)
        ));
    }

    pub fn worker_error(&self, worker: usize) {
        self.sink
            .emit_line(&format!("WORKER_STATUS: Worker {worker} is now error"));
    }

    pub fn dashboard_update(&self, update: &DashboardUpdate) {
        self.emit_json("DASHBOARD_UPDATE", update);
    }

    /// Summarize the latest issues (grant failures and matching misses),
    /// most recent last, truncated to the 50 newest.
    pub fn results_update(&self, results: &[ShareResult]) {
        let issues: Vec<&ShareResult> = results.iter().filter(|r| !r.success).collect();
        let truncated_count = issues.len().saturating_sub(MAX_ISSUES);
        let rows: Vec<IssueRow> = issues
            .iter()
            .skip(truncated_count)
            .map(|r| IssueRow {
                row: r.recipient.row,
                name: sanitize_text(&r.recipient.name),
                email: sanitize_text(&r.recipient.email),
                error: sanitize_text(r.error.as_deref().unwrap_or("")),
                error_code: r.error_code.map(|c| c.as_str()),
            })
            .collect();
        let update = ResultsUpdate {
            issue_count: rows.len(),
            issues: rows,
            truncated_count,
        };
        self.emit_json("RESULTS_UPDATE", &update);
    }

    pub fn success(&self, message: &str) {
        self.sink
            .emit_line(&format!("SUCCESS: {}", sanitize_text(message)));
    }

    pub fn error(&self, message: &str) {
        self.sink
            .emit_line(&format!("ERROR: {}", sanitize_text(message)));
    }

    pub fn final_stats(&self, counters: &ProgressCounters, elapsed_secs: u64, rate: f64) {
        self.sink.emit_line(&format!(
            "FINAL_STATS: Processed={}, Successful={}, Failed={}, Time={}s, Speed={:.2}/s",
            counters.processed, counters.successful, counters.failed, elapsed_secs, rate
        ));
    }

    /// Emit `<tag>: <json>` with the oversize fallback.
    fn emit_json<T: Serialize>(&self, tag: &str, payload: &T) {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("[events] {tag} serialization failed: {e}");
                return;
            }
        };
        if json.len() > MAX_JSON_PAYLOAD {
            self.sink
                .emit_line(&format!("{tag}: {{\"error\":\"Data too large\"}}"));
        } else {
            self.sink.emit_line(&format!("{tag}: {json}"));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
