//! Fixed-size worker pool over channels.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────────────────┐
//!                 │                 WorkerPool                   │
//!                 │                                              │
//!   Coordinator ──┼─► task channel (FIFO) ──┬────────────────────┤
//!                 │                         ▼                    │
//!                 │        ┌────────────┬────────────┬─────────┐ │
//!                 │        │  Worker 0  │  Worker 1  │  ...    │ │
//!                 │        └──────┬─────┴──────┬─────┴────┬────┘ │
//!                 │               └────────────┴──────────┘      │
//!                 │                        │                     │
//!   Coordinator ◄─┼── message channel (Ready / Working /         │
//!                 │    Outcome / Crashed)                        │
//!                 └──────────────────────────────────────────────┘
//! ```
//!
//! Dispatch is pull-based: every worker blocks on the shared FIFO channel
//! and takes the next task the moment it finishes the previous one, so no
//! worker can be starved by another. The coordinator submits the whole
//! to-do list up front; "initial fan-out" falls out of the first `W`
//! receives.
//!
//! All mutable run state (counters, results, cell updates, history) lives
//! with the coordinator. Workers own only their in-flight task and report
//! everything over the message channel; there are no shared locks.
//!
//! # Worker state machine
//!
//! ```text
//! [uninit] --init ok--> [idle] --task received--> [working]
//!                            <--outcome sent-----|
//! [uninit|working] --init error / panic--> [error]  (thread exits,
//!                                                    queue survives)
//! ```
//!
//! # Rate limiting
//!
//! Each worker sleeps `rate_limit` after every remote call. With `W`
//! workers that bounds the call rate at `W / rate_limit` per second; tune
//! the worker count against the external service's quota.
//!
//! # Panic isolation
//!
//! A panic inside the remote call is caught with `catch_unwind`; the worker
//! reports `Crashed` and exits. Tasks still in the queue are picked up by
//! the remaining workers. The in-flight task of a crashed worker produces no
//! outcome this run; its status cell stays FALSE so it is retried next run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::api::Task;
use crate::client::{GrantError, RemoteClient};

// ============================================================================
// Configuration
// ============================================================================

/// Pool tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Post-call sleep per worker.
    pub rate_limit: Duration,
    /// How long to wait for worker readiness before excluding stragglers.
    pub init_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            rate_limit: Duration::from_millis(100),
            init_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// Panics on invalid values; call before `WorkerPool::start`.
    pub fn validate(&self) {
        assert!(self.workers > 0, "workers must be > 0");
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Result of one grant attempt, tied back to its task.
#[derive(Debug)]
pub struct TaskOutcome {
    pub task: Task,
    pub result: Result<String, GrantError>,
}

/// Worker → coordinator traffic.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Client initialization succeeded; the worker is idle.
    Ready { worker: usize },
    /// Client initialization failed; the worker exited without taking work.
    InitFailed { worker: usize, detail: String },
    /// The worker picked up a task.
    Working { worker: usize, name: String },
    /// The worker finished a task (success or classified failure).
    Outcome { worker: usize, outcome: TaskOutcome },
    /// The worker panicked mid-task and exited.
    Crashed { worker: usize, detail: String },
}

/// Readiness roll call after `wait_ready`.
#[derive(Debug, Default)]
pub struct ReadyReport {
    pub ready: Vec<usize>,
    pub failed: Vec<usize>,
}

impl ReadyReport {
    pub fn live_workers(&self) -> usize {
        self.ready.len()
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Handle to the running pool, owned by the coordinator.
pub struct WorkerPool {
    task_tx: Option<Sender<Task>>,
    messages: Receiver<WorkerMessage>,
    threads: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    workers: usize,
}

impl WorkerPool {
    /// Spawn `config.workers` named worker threads.
    pub fn start(config: &PoolConfig, client: Arc<dyn RemoteClient>) -> Self {
        config.validate();

        let (task_tx, task_rx) = crossbeam_channel::unbounded::<Task>();
        let (msg_tx, msg_rx) = crossbeam_channel::unbounded::<WorkerMessage>();
        let stop = Arc::new(AtomicBool::new(false));

        let mut threads = Vec::with_capacity(config.workers);
        for worker in 0..config.workers {
            let tasks = task_rx.clone();
            let messages = msg_tx.clone();
            let client = Arc::clone(&client);
            let stop = Arc::clone(&stop);
            let rate_limit = config.rate_limit;
            let handle = thread::Builder::new()
                .name(format!("share-worker-{worker}"))
                .spawn(move || worker_loop(worker, tasks, messages, client, stop, rate_limit))
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }

        Self {
            task_tx: Some(task_tx),
            messages: msg_rx,
            threads,
            stop,
            workers: config.workers,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Block until every worker has reported readiness (or failure), or the
    /// deadline passes. Workers that neither reported nor failed in time are
    /// listed as failed and will simply never take work if truly stuck.
    pub fn wait_ready(&self, timeout: Duration) -> ReadyReport {
        let deadline = Instant::now() + timeout;
        let mut report = ReadyReport::default();
        let mut heard = 0usize;

        while heard < self.workers {
            match self.messages.recv_deadline(deadline) {
                Ok(WorkerMessage::Ready { worker }) => {
                    heard += 1;
                    report.ready.push(worker);
                }
                Ok(WorkerMessage::InitFailed { worker, detail }) => {
                    heard += 1;
                    eprintln!("[pool] worker {worker} failed to initialize: {detail}");
                    report.failed.push(worker);
                }
                // Task traffic cannot arrive before dispatch; ignore if it
                // somehow does.
                Ok(_) => {}
                Err(_) => break,
            }
        }

        for worker in 0..self.workers {
            if !report.ready.contains(&worker) && !report.failed.contains(&worker) {
                eprintln!("[pool] worker {worker} missed the readiness deadline");
                report.failed.push(worker);
            }
        }
        report
    }

    /// Queue a task. Returns the task back if the pool is closed.
    pub fn submit(&self, task: Task) -> Result<(), Task> {
        match &self.task_tx {
            Some(tx) => tx.send(task).map_err(|e| e.0),
            None => Err(task),
        }
    }

    /// Worker → coordinator message stream.
    pub fn messages(&self) -> &Receiver<WorkerMessage> {
        &self.messages
    }

    /// Stop accepting new tasks. Workers drain what is already queued,
    /// then exit when the queue is empty.
    pub fn close(&mut self) {
        self.task_tx = None;
    }

    /// Signal all workers to exit. Each finishes its in-flight task (if
    /// any), then stops without taking more work; queued tasks are left
    /// unprocessed.
    pub fn terminate(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Terminate and join all worker threads.
    pub fn join(mut self) {
        self.terminate();
        self.close();
        for handle in self.threads.drain(..) {
            // Worker panics are caught inside the loop; a join error here
            // would mean the catch itself failed, which we don't propagate.
            let _ = handle.join();
        }
    }
}

// ============================================================================
// Worker loop
// ============================================================================

/// How often an idle worker re-checks the stop flag.
const IDLE_POLL: Duration = Duration::from_millis(50);

fn worker_loop(
    worker: usize,
    tasks: Receiver<Task>,
    messages: Sender<WorkerMessage>,
    client: Arc<dyn RemoteClient>,
    stop: Arc<AtomicBool>,
    rate_limit: Duration,
) {
    match client.init_worker(worker) {
        Ok(()) => {
            if messages.send(WorkerMessage::Ready { worker }).is_err() {
                return;
            }
        }
        Err(e) => {
            let _ = messages.send(WorkerMessage::InitFailed {
                worker,
                detail: e.to_string(),
            });
            return;
        }
    }

    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        let task = match tasks.recv_timeout(IDLE_POLL) {
            Ok(task) => task,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        };

        if messages
            .send(WorkerMessage::Working {
                worker,
                name: task.recipient.name.clone(),
            })
            .is_err()
        {
            return;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            client.grant_read(&task.folder_id, &task.email)
        }));

        match result {
            Ok(result) => {
                if !rate_limit.is_zero() {
                    thread::sleep(rate_limit);
                }
                if messages
                    .send(WorkerMessage::Outcome {
                        worker,
                        outcome: TaskOutcome { task, result },
                    })
                    .is_err()
                {
                    return;
                }
            }
            Err(payload) => {
                let _ = messages.send(WorkerMessage::Crashed {
                    worker,
                    detail: panic_detail(payload),
                });
                return;
            }
        }
    }
}

fn panic_detail(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Recipient;
    use crate::client::{FakeClient, FakeFailure};
    use std::collections::HashSet;

    fn task(n: u32) -> Task {
        Task {
            folder_id: format!("f{n}"),
            email: format!("r{n}@x"),
            recipient: Recipient {
                row: n,
                email: format!("r{n}@x"),
                name: format!("Recipient {n}"),
                is_shared: false,
                last_log: String::new(),
            },
        }
    }

    fn test_config(workers: usize) -> PoolConfig {
        PoolConfig {
            workers,
            rate_limit: Duration::ZERO,
            init_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn all_submitted_tasks_produce_outcomes() {
        let client = Arc::new(FakeClient::new());
        let pool = WorkerPool::start(&test_config(4), client.clone());
        let report = pool.wait_ready(Duration::from_secs(5));
        assert_eq!(report.live_workers(), 4);

        let n = 32;
        for i in 0..n {
            pool.submit(task(i)).unwrap();
        }

        let mut outcomes = 0;
        while outcomes < n {
            match pool.messages().recv_timeout(Duration::from_secs(5)).unwrap() {
                WorkerMessage::Outcome { outcome, .. } => {
                    outcomes += 1;
                    assert!(outcome.result.is_ok());
                }
                WorkerMessage::Working { .. } => {}
                other => panic!("unexpected message: {other:?}"),
            }
        }
        pool.join();
        assert_eq!(client.grants().len(), n as usize);
    }

    #[test]
    fn init_failure_excludes_worker() {
        let client = Arc::new(FakeClient::new());
        client.fail_worker_init(0);
        let pool = WorkerPool::start(&test_config(3), client);
        let report = pool.wait_ready(Duration::from_secs(5));
        assert_eq!(report.failed, vec![0]);
        let ready: HashSet<usize> = report.ready.iter().copied().collect();
        assert_eq!(ready, HashSet::from([1, 2]));
        pool.join();
    }

    #[test]
    fn panic_is_isolated_and_queue_survives() {
        let client = Arc::new(FakeClient::new());
        client.fail_email("r1@x", FakeFailure::Panic);
        let pool = WorkerPool::start(&test_config(2), client.clone());
        assert_eq!(pool.wait_ready(Duration::from_secs(5)).live_workers(), 2);

        for i in 0..8 {
            pool.submit(task(i)).unwrap();
        }

        let mut outcomes = 0;
        let mut crashes = 0;
        while outcomes < 7 {
            match pool.messages().recv_timeout(Duration::from_secs(5)).unwrap() {
                WorkerMessage::Outcome { .. } => outcomes += 1,
                WorkerMessage::Crashed { worker, detail } => {
                    crashes += 1;
                    assert!(worker < 2);
                    assert!(detail.contains("scripted panic"), "detail: {detail}");
                }
                WorkerMessage::Working { .. } => {}
                other => panic!("unexpected message: {other:?}"),
            }
        }
        assert_eq!(crashes, 1);
        pool.join();
        // Every task except the panicking one was granted.
        assert_eq!(client.grants().len(), 7);
    }

    #[test]
    fn classified_failures_are_outcomes_not_crashes() {
        let client = Arc::new(FakeClient::new());
        client.fail_email("r0@x", FakeFailure::Code(crate::api::ErrorCode::RateLimited));
        let pool = WorkerPool::start(&test_config(1), client);
        pool.wait_ready(Duration::from_secs(5));
        pool.submit(task(0)).unwrap();

        loop {
            match pool.messages().recv_timeout(Duration::from_secs(5)).unwrap() {
                WorkerMessage::Outcome { outcome, .. } => {
                    let err = outcome.result.unwrap_err();
                    assert_eq!(err.code, crate::api::ErrorCode::RateLimited);
                    break;
                }
                WorkerMessage::Working { .. } => {}
                other => panic!("unexpected message: {other:?}"),
            }
        }
        pool.join();
    }

    #[test]
    fn submit_after_close_returns_task() {
        let client = Arc::new(FakeClient::new());
        let mut pool = WorkerPool::start(&test_config(1), client);
        pool.wait_ready(Duration::from_secs(5));
        pool.close();
        let t = task(0);
        assert_eq!(pool.submit(t.clone()), Err(t));
        pool.join();
    }
}
