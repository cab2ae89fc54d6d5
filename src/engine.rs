//! Run coordinator.
//!
//! # Architecture
//!
//! ```text
//!  folder-map.json ──┐
//!  recipient-cache ──┼─► compute to-do set ─► pre-dispatch filter
//!  history.json ─────┘          │                   │ (NO_FOLDER issues)
//!                               ▼                   ▼
//!                        WorkerPool ◄── tasks   results/counters/cells
//!                               │
//!                               ▼ outcomes (completion order)
//!                        outcome loop: counters → processed keys →
//!                        cell updates → events → periodic history save
//!                               │ quiescence
//!                               ▼
//!                        batch_write_cells (retry ×3) ─► history delete,
//!                        FINAL_STATS, results artifact
//! ```
//!
//! The coordinator owns every piece of mutable run state — counters, result
//! list, cell updates, processed keys, history — and is the only thread that
//! touches it. Workers communicate exclusively over the pool's message
//! channel, so the order in which outcomes are observed here *defines*
//! result order and counter values.
//!
//! # Resume
//!
//! Work is de-duplicated from two independent truth sources: recipients
//! whose `isShared` is already TRUE in the input, and keys in the prior
//! history snapshot. Either alone is sufficient to prevent a duplicate
//! grant; the snapshot covers the window where grants landed but the cell
//! flush did not.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;

use crate::api::{iso_timestamp, CellUpdate, Recipient, ShareResult, Task};
use crate::client::{ClientError, RemoteClient};
use crate::config::ShareConfig;
use crate::counters::ProgressCounters;
use crate::events::{DashboardUpdate, EventEmitter, SpeedUpdate};
use crate::history::{HistorySnapshot, HistoryStore, RawCounters};
use crate::inputs::{self, InputError, RecipientCache};
use crate::lifecycle::ShutdownFlag;
use crate::matcher::find_folder_id;
use crate::pool::{PoolConfig, TaskOutcome, WorkerMessage, WorkerPool};
use crate::results;

/// How long the outcome loop waits before re-checking the shutdown flag.
const OUTCOME_POLL: Duration = Duration::from_millis(100);

/// Flush attempts before the run is declared failed.
const FLUSH_ATTEMPTS: u32 = 3;

// ============================================================================
// Errors and report
// ============================================================================

/// Fatal run failure.
#[derive(Debug)]
pub enum EngineError {
    /// Missing or malformed input artifact.
    Input(InputError),
    /// No worker survived initialization.
    NoWorkers,
    /// Every worker died mid-run with tasks unresolved.
    AllWorkersFailed { unresolved: usize },
    /// The final cell flush failed after retries; history was kept.
    Flush(ClientError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input(err) => write!(f, "{err}"),
            Self::NoWorkers => write!(f, "no workers initialized"),
            Self::AllWorkersFailed { unresolved } => {
                write!(f, "all workers failed with {unresolved} tasks unresolved")
            }
            Self::Flush(err) => write!(f, "cell flush failed: {err}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Input(err) => Some(err),
            Self::Flush(err) => Some(err),
            _ => None,
        }
    }
}

impl From<InputError> for EngineError {
    fn from(err: InputError) -> Self {
        Self::Input(err)
    }
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// Quiesced, flushed, history deleted.
    Completed,
    /// Shutdown signal observed; history saved for resume.
    Interrupted,
}

/// Summary returned to the caller.
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub counters: ProgressCounters,
    pub results: Vec<ShareResult>,
    pub elapsed: Duration,
}

// ============================================================================
// Run state
// ============================================================================

/// Coordinator-owned mutable state for one run.
struct RunState {
    counters: ProgressCounters,
    /// Fast membership test for processed keys.
    processed: HashSet<String>,
    /// Insertion-ordered keys, persisted to history.
    processed_order: Vec<String>,
    results: Vec<ShareResult>,
    updates: Vec<CellUpdate>,
    error_log: Vec<String>,
    start_time: String,
    /// Outcomes recorded by *this* process (drives speed/ETA).
    session_outcomes: u64,
    outcomes_since_save: usize,
}

impl RunState {
    fn fresh() -> Self {
        Self {
            counters: ProgressCounters::default(),
            processed: HashSet::new(),
            processed_order: Vec::new(),
            results: Vec::new(),
            updates: Vec::new(),
            error_log: Vec::new(),
            start_time: iso_timestamp(),
            session_outcomes: 0,
            outcomes_since_save: 0,
        }
    }

    fn restore(&mut self, snapshot: HistorySnapshot) {
        match snapshot.progress_stats.validated() {
            Some(counters) => self.counters = counters,
            None => {
                eprintln!(
                    "[engine] history counters violate invariants; resetting to zero \
                     (processed keys are kept)"
                );
                self.counters = ProgressCounters::default();
            }
        }
        for key in snapshot.processed_participants {
            self.insert_key(key);
        }
        self.results = snapshot.share_results;
        self.updates = snapshot.batch_updates;
        self.error_log = snapshot.error_log;
        if !snapshot.start_time.is_empty() {
            self.start_time = snapshot.start_time;
        }
    }

    fn insert_key(&mut self, key: String) {
        if self.processed.insert(key.clone()) {
            self.processed_order.push(key);
        }
    }

    fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            timestamp: iso_timestamp(),
            processed_participants: self.processed_order.clone(),
            share_results: self.results.clone(),
            batch_updates: self.updates.clone(),
            error_log: self.error_log.clone(),
            progress_stats: RawCounters::from_counters(&self.counters),
            start_time: self.start_time.clone(),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// One-shot run coordinator. Construct, call [`Engine::run`], inspect the
/// report.
pub struct Engine {
    config: ShareConfig,
    client: Arc<dyn RemoteClient>,
    events: EventEmitter,
    shutdown: ShutdownFlag,
}

impl Engine {
    pub fn new(
        config: ShareConfig,
        client: Arc<dyn RemoteClient>,
        events: EventEmitter,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            config,
            client,
            events,
            shutdown,
        }
    }

    /// Execute a full run: load, dispatch, drive to quiescence, flush,
    /// finalize.
    pub fn run(&self) -> Result<RunReport, EngineError> {
        let run_started = Instant::now();

        // Step 1: inputs and prior snapshot.
        let folder_map = inputs::load_folder_map(&self.config.folder_map_path)?;
        let mut cache = inputs::load_recipient_cache(&self.config.recipients_path)?;
        let store = HistoryStore::new(&self.config.history_path);

        let mut state = RunState::fresh();
        if let Some(snapshot) = store.load() {
            eprintln!(
                "[engine] resuming from {} ({} processed keys)",
                store.path().display(),
                snapshot.processed_participants.len()
            );
            state.restore(snapshot);
        }

        // Step 2: to-do set with eager folder resolution.
        let mut todo: Vec<(Recipient, Option<String>)> = Vec::new();
        for participant in &cache.participants {
            if participant.is_shared {
                continue;
            }
            if state.processed.contains(&participant.processed_key()) {
                continue;
            }
            let folder = find_folder_id(&folder_map, &participant.name).map(str::to_string);
            todo.push((participant.clone(), folder));
        }

        state.counters.total = state.counters.processed + todo.len() as u64;
        state.counters.validate(self.config.workers as u64);

        // Step 3: pre-dispatch filter. Unmatched recipients are processed
        // immediately as NO_FOLDER issues and never enqueued; their status
        // cell stays FALSE so they remain candidates next run.
        let mut tasks: Vec<Task> = Vec::new();
        for (recipient, folder) in todo {
            match folder {
                Some(folder_id) => tasks.push(Task {
                    folder_id,
                    email: recipient.email.clone(),
                    recipient,
                }),
                None => self.record_no_folder(&mut state, recipient, &store, run_started),
            }
        }

        // Steps 4–5: dispatch and drive to quiescence.
        let status = if tasks.is_empty() {
            RunStatus::Completed
        } else {
            self.drive(&mut state, tasks, &store, &mut cache, run_started)?
        };

        let elapsed = run_started.elapsed();
        match status {
            RunStatus::Interrupted => {
                self.save_history(&store, &state);
                self.events.flush();
                Ok(RunReport {
                    status,
                    counters: state.counters,
                    results: state.results,
                    elapsed,
                })
            }
            RunStatus::Completed => {
                // Step 6: flush accumulated cell updates.
                if let Err(err) = self.flush_updates(&state) {
                    self.save_history(&store, &state);
                    self.events.flush();
                    return Err(err);
                }

                // Step 7: finalize.
                if let Err(err) = store.delete() {
                    eprintln!("[engine] cannot delete history file: {err}");
                }
                let rate = self.session_rate(&state, elapsed);
                self.events
                    .final_stats(&state.counters, elapsed.as_secs(), rate);
                if let Err(err) = results::write_results(
                    &self.config.results_path,
                    &self.config,
                    &state.counters,
                    &state.results,
                    &state.error_log,
                    elapsed,
                ) {
                    eprintln!("[engine] cannot write results file: {err}");
                }
                self.events.flush();
                Ok(RunReport {
                    status,
                    counters: state.counters,
                    results: state.results,
                    elapsed,
                })
            }
        }
    }

    /// Outcome loop: dispatch tasks and consume worker messages until the
    /// queue drains, shutdown is requested, or every worker dies.
    fn drive(
        &self,
        state: &mut RunState,
        tasks: Vec<Task>,
        store: &HistoryStore,
        cache: &mut RecipientCache,
        run_started: Instant,
    ) -> Result<RunStatus, EngineError> {
        let pool_config = PoolConfig {
            workers: self.config.workers,
            rate_limit: self.config.rate_limit,
            init_timeout: self.config.init_timeout,
        };
        let pool = WorkerPool::start(&pool_config, Arc::clone(&self.client));

        let ready = pool.wait_ready(self.config.init_timeout);
        for worker in &ready.ready {
            self.events.worker_idle(*worker);
        }
        for worker in &ready.failed {
            self.events.worker_error(*worker);
        }
        let mut live = ready.live_workers();
        if live == 0 {
            self.save_history(store, state);
            pool.join();
            return Err(EngineError::NoWorkers);
        }

        let mut pending = 0usize;
        for task in tasks {
            match pool.submit(task) {
                Ok(()) => pending += 1,
                Err(task) => {
                    // Channel closed under us; treat like a crashed dispatch.
                    state
                        .error_log
                        .push(format!("failed to enqueue task for {}", task.email));
                }
            }
        }
        self.emit_burst(state, pending as u64, run_started);

        // Which workers currently hold a task (for crash accounting).
        let mut in_flight: HashMap<usize, bool> = HashMap::new();
        let mut interrupted = false;
        let messages = pool.messages().clone();

        while pending > 0 {
            if self.shutdown.is_requested() {
                // Stop folding completions into progress accounting; save
                // and exit. In-flight grants finish or fail on their own.
                interrupted = true;
                break;
            }
            match messages.recv_timeout(OUTCOME_POLL) {
                Ok(WorkerMessage::Working { worker, name }) => {
                    in_flight.insert(worker, true);
                    state.counters.active_workers += 1;
                    state.counters.validate(self.config.workers as u64);
                    self.events.worker_working(worker, &name);
                }
                Ok(WorkerMessage::Outcome { worker, outcome }) => {
                    in_flight.insert(worker, false);
                    state.counters.active_workers =
                        state.counters.active_workers.saturating_sub(1);
                    pending -= 1;
                    let queued = (pending as u64).saturating_sub(state.counters.active_workers);
                    self.record_outcome(state, outcome, queued, store, cache, run_started);
                    self.events.worker_idle(worker);
                }
                Ok(WorkerMessage::Crashed { worker, detail }) => {
                    live = live.saturating_sub(1);
                    if in_flight.remove(&worker) == Some(true) {
                        // Its task produces no outcome this run; the status
                        // cell stays FALSE and the recipient is retried on
                        // the next run.
                        pending -= 1;
                        state.counters.active_workers =
                            state.counters.active_workers.saturating_sub(1);
                    }
                    state
                        .error_log
                        .push(format!("worker {worker} crashed: {detail}"));
                    self.events.worker_error(worker);
                    if live == 0 && pending > 0 {
                        self.save_history(store, state);
                        pool.join();
                        return Err(EngineError::AllWorkersFailed {
                            unresolved: pending,
                        });
                    }
                }
                // Late readiness past the deadline: the worker was counted
                // failed, but the shared queue lets it contribute after all.
                Ok(WorkerMessage::Ready { worker }) => {
                    live += 1;
                    self.events.worker_idle(worker);
                }
                Ok(WorkerMessage::InitFailed { .. }) => {}
                Err(RecvTimeoutError::Timeout) => continue,
                // Every worker hung up without a crash report; nothing can
                // resolve the remaining tasks.
                Err(RecvTimeoutError::Disconnected) => {
                    self.save_history(store, state);
                    pool.join();
                    return Err(EngineError::AllWorkersFailed {
                        unresolved: pending,
                    });
                }
            }
        }

        pool.join();
        state.counters.active_workers = 0;
        Ok(if interrupted {
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        })
    }

    /// Record a pre-dispatch matching miss (counted in `processed` and
    /// `errors`, never `failed`).
    fn record_no_folder(
        &self,
        state: &mut RunState,
        recipient: Recipient,
        store: &HistoryStore,
        run_started: Instant,
    ) {
        let timestamp = iso_timestamp();
        let mut result = ShareResult::no_folder(recipient);
        result.timestamp = timestamp.clone();

        state.counters.processed += 1;
        state.counters.errors += 1;
        state.counters.validate(self.config.workers as u64);
        state.insert_key(result.recipient.processed_key());

        let row = result.recipient.row;
        state.updates.push(CellUpdate::status(row, false));
        state
            .updates
            .push(CellUpdate::log(row, format!("Issue: No folder found - {timestamp}")));

        self.events.error(&format!(
            "No folder found for {} (row {row})",
            result.recipient.name
        ));
        state.results.push(result);
        state.session_outcomes += 1;
        self.emit_burst(state, 0, run_started);
        self.maybe_save_history(state, store);
    }

    /// Fold one worker outcome into counters, keys, cell updates, events,
    /// and the periodic history save.
    fn record_outcome(
        &self,
        state: &mut RunState,
        outcome: TaskOutcome,
        queued: u64,
        store: &HistoryStore,
        cache: &mut RecipientCache,
        run_started: Instant,
    ) {
        let timestamp = iso_timestamp();
        let TaskOutcome { task, result } = outcome;
        let row = task.recipient.row;

        let mut share_result = match result {
            Ok(permission_id) => {
                state.counters.successful += 1;
                state.updates.push(CellUpdate::status(row, true));
                state.updates.push(CellUpdate::log(row, timestamp.clone()));
                self.events.success(&format!(
                    "Shared {} with {} (row {row})",
                    task.folder_id, task.email
                ));
                ShareResult::granted(task.recipient, task.folder_id, permission_id)
            }
            Err(err) => {
                state.counters.failed += 1;
                state.updates.push(CellUpdate::status(row, false));
                state
                    .updates
                    .push(CellUpdate::log(row, format!("Failed: {timestamp}")));
                self.events
                    .error(&format!("Grant failed for {} (row {row}): {err}", task.email));
                ShareResult::failed(task.recipient, task.folder_id, err.message, err.code)
            }
        };
        share_result.timestamp = timestamp;

        state.counters.processed += 1;
        state.counters.validate(self.config.workers as u64);
        state.insert_key(share_result.recipient.processed_key());

        if share_result.success && self.config.update_cache {
            self.write_through(cache, &share_result);
        }

        state.results.push(share_result);
        state.session_outcomes += 1;
        self.emit_burst(state, queued, run_started);
        self.maybe_save_history(state, store);
    }

    /// Mark the recipient shared in the local cache artifact and publish the
    /// aggregate document state.
    fn write_through(&self, cache: &mut RecipientCache, result: &ShareResult) {
        if let Some(participant) = cache
            .participants
            .iter_mut()
            .find(|p| p.row == result.recipient.row)
        {
            participant.is_shared = true;
            participant.last_log = result.timestamp.clone();
        }
        if let Err(err) = inputs::store_recipient_cache(&self.config.recipients_path, cache) {
            eprintln!("[engine] cache write-through failed: {err}");
            return;
        }
        let shared = cache.participants.iter().filter(|p| p.is_shared).count() as u64;
        let total = cache.participants.len() as u64;
        self.events.dashboard_update(&DashboardUpdate {
            timestamp: iso_timestamp(),
            total_participants: total,
            shared_count: shared,
            pending_count: total.saturating_sub(shared),
        });
    }

    /// The per-outcome event burst: PROGRESS, STATUS, WORKERS, SPEED,
    /// SPEED_UPDATE, RESULTS_UPDATE.
    fn emit_burst(&self, state: &RunState, queued: u64, run_started: Instant) {
        let rate = self.session_rate(state, run_started.elapsed());
        let remaining = state.counters.remaining();
        let eta = if rate > 0.0 {
            (remaining as f64 / rate).ceil() as u64
        } else {
            0
        };

        self.events.progress(&state.counters);
        self.events.status(&state.counters);
        self.events
            .workers(&state.counters, self.config.workers as u64, queued);
        self.events.speed(rate, eta);
        self.events.speed_update(&SpeedUpdate {
            speed: rate,
            unit: "per_second",
            processed: state.counters.processed,
            total: state.counters.total,
            successful: state.counters.successful,
            failed: state.counters.failed,
            active_workers: state.counters.active_workers,
            worker_count: self.config.workers as u64,
            eta,
            timestamp: iso_timestamp(),
        });
        self.events.results_update(&state.results);
    }

    fn session_rate(&self, state: &RunState, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            state.session_outcomes as f64 / secs
        } else {
            0.0
        }
    }

    fn maybe_save_history(&self, state: &mut RunState, store: &HistoryStore) {
        state.outcomes_since_save += 1;
        if state.outcomes_since_save >= self.config.history_batch {
            state.outcomes_since_save = 0;
            self.save_history(store, state);
        }
    }

    /// Best-effort snapshot save; failure degrades resume, not the run.
    fn save_history(&self, store: &HistoryStore, state: &RunState) {
        if let Err(err) = store.save(&state.snapshot()) {
            eprintln!(
                "[engine] history save failed ({}): {err}",
                store.path().display()
            );
        }
    }

    /// Resolve the sheet title and write all pending cell updates, retrying
    /// with exponential backoff before giving up.
    fn flush_updates(&self, state: &RunState) -> Result<(), EngineError> {
        if state.updates.is_empty() {
            return Ok(());
        }
        let sheet_title = self.resolve_sheet_title();

        let mut delay = Duration::from_secs(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.batch_write_cells(
                &self.config.document_id,
                &sheet_title,
                &state.updates,
            ) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if attempt >= FLUSH_ATTEMPTS {
                        return Err(EngineError::Flush(err));
                    }
                    eprintln!(
                        "[engine] batch write failed (attempt {attempt}/{FLUSH_ATTEMPTS}): {err}; \
                         retrying in {}s",
                        delay.as_secs()
                    );
                    thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }

    /// Match the configured sheet title case-insensitively against the
    /// document's sheets, falling back to the first sheet, then to the
    /// configured title verbatim if the listing itself fails.
    fn resolve_sheet_title(&self) -> String {
        match self.client.list_sheets(&self.config.document_id) {
            Ok(sheets) => {
                let wanted = self.config.sheet_title.to_lowercase();
                if let Some(sheet) = sheets.iter().find(|s| s.title.to_lowercase() == wanted) {
                    return sheet.title.clone();
                }
                if let Some(first) = sheets.first() {
                    eprintln!(
                        "[engine] sheet '{}' not found; using first sheet '{}'",
                        self.config.sheet_title, first.title
                    );
                    return first.title.clone();
                }
                self.config.sheet_title.clone()
            }
            Err(err) => {
                eprintln!("[engine] list_sheets failed: {err}; using configured title");
                self.config.sheet_title.clone()
            }
        }
    }
}
