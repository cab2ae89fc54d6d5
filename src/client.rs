//! Remote document + storage service capability.
//!
//! The engine never talks to the external service directly; it holds a
//! [`RemoteClient`]: three operations and nothing else. Production wires in
//! [`BridgeClient`], which spawns a credential-holding helper process and
//! speaks line-delimited JSON over its stdio; tests substitute
//! [`FakeClient`].
//!
//! # Error classification
//!
//! Grant failures carry an [`ErrorCode`] so the engine can record *why* a
//! grant failed without understanding the service's wire format. The client
//! never retries internally: retry policy belongs to the engine (re-running
//! re-enqueues anything whose status cell is still FALSE).
//!
//! # Timeouts
//!
//! Each bridge call is bounded by a deadline (default 30 s). The bridge's
//! stdout is drained by a dedicated reader thread into a channel, and the
//! calling thread waits with `recv_timeout`; a stuck helper surfaces as
//! [`ClientError::Timeout`] instead of hanging a worker.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};

use crate::api::{CellUpdate, ErrorCode, SheetInfo};

/// Default per-call deadline for bridge operations.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Errors
// ============================================================================

/// A failed grant, classified for the result artifacts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrantError {
    pub code: ErrorCode,
    pub message: String,
}

impl GrantError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for GrantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for GrantError {}

/// Transport/protocol failures from non-grant operations.
#[derive(Debug)]
pub enum ClientError {
    /// I/O error talking to the helper process.
    Io(io::Error),
    /// The helper produced something that is not a valid response line.
    Protocol(String),
    /// The service reported a failure (e.g. batch write rejected).
    Remote(String),
    /// No response within the per-call deadline.
    Timeout(Duration),
    /// The helper exited; no further calls can succeed.
    Closed,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Protocol(detail) => write!(f, "protocol error: {detail}"),
            Self::Remote(detail) => write!(f, "service rejected request: {detail}"),
            Self::Timeout(deadline) => {
                write!(f, "no response within {:.0}s", deadline.as_secs_f64())
            }
            Self::Closed => write!(f, "bridge process closed"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

// ============================================================================
// Capability trait
// ============================================================================

/// Capability over the external document + storage service.
///
/// Implementations are stateless beyond an attached credential capability
/// and must be callable from multiple worker threads.
pub trait RemoteClient: Send + Sync {
    /// Per-worker initialization hook, called once when a worker starts.
    ///
    /// The default is a no-op; implementations with per-connection setup can
    /// fail here, which marks the worker `error` and excludes it from
    /// dispatch.
    fn init_worker(&self, _worker: usize) -> Result<(), ClientError> {
        Ok(())
    }

    /// Grant `email` read access to `folder_id` without notifying the user.
    /// Returns the created permission id.
    fn grant_read(&self, folder_id: &str, email: &str) -> Result<String, GrantError>;

    /// List the sheets of the remote document.
    fn list_sheets(&self, document_id: &str) -> Result<Vec<SheetInfo>, ClientError>;

    /// Write all `updates` to `sheet_title` in one batch. Atomic from the
    /// engine's perspective: either every update is accepted or the call
    /// fails as a whole.
    fn batch_write_cells(
        &self,
        document_id: &str,
        sheet_title: &str,
        updates: &[CellUpdate],
    ) -> Result<(), ClientError>;
}

// ============================================================================
// Bridge wire format
// ============================================================================

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum BridgeRequest<'a> {
    #[serde(rename_all = "camelCase")]
    GrantRead { folder_id: &'a str, email: &'a str },
    #[serde(rename_all = "camelCase")]
    ListSheets { document_id: &'a str },
    #[serde(rename_all = "camelCase")]
    BatchWriteCells {
        document_id: &'a str,
        sheet_title: &'a str,
        updates: &'a [CellUpdate],
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeResponse {
    ok: bool,
    #[serde(default)]
    permission_id: Option<String>,
    #[serde(default)]
    sheets: Option<Vec<SheetInfo>>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<ErrorCode>,
}

// ============================================================================
// BridgeClient
// ============================================================================

/// Production client: an opaque helper process owning the credentials,
/// driven over line-delimited JSON on stdin/stdout.
///
/// Calls are serialized (one request/response in flight at a time); with the
/// per-worker rate-limit sleep the bridge is never the contention point.
pub struct BridgeClient {
    stdin: Mutex<ChildStdin>,
    responses: Receiver<String>,
    child: Mutex<Child>,
    timeout: Duration,
}

impl BridgeClient {
    /// Spawn the helper and wire up its stdio.
    ///
    /// The helper inherits stderr so its own diagnostics land next to ours.
    pub fn spawn(command: &Path, credentials: &Path) -> io::Result<Self> {
        Self::spawn_with_timeout(command, credentials, DEFAULT_CALL_TIMEOUT)
    }

    pub fn spawn_with_timeout(
        command: &Path,
        credentials: &Path,
        timeout: Duration,
    ) -> io::Result<Self> {
        let mut child = Command::new(command)
            .arg("--credentials")
            .arg(credentials)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("bridge stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("bridge stdout unavailable"))?;

        let (tx, rx) = crossbeam_channel::unbounded();
        thread::Builder::new()
            .name("bridge-reader".to_string())
            .spawn(move || {
                let reader = BufReader::new(stdout);
                for line in reader.lines() {
                    match line {
                        Ok(line) => {
                            if tx.send(line).is_err() {
                                return;
                            }
                        }
                        // Read error or EOF: drop the sender so callers see
                        // Disconnected instead of waiting out the timeout.
                        Err(_) => return,
                    }
                }
            })?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            responses: rx,
            child: Mutex::new(child),
            timeout,
        })
    }

    fn call(&self, request: &BridgeRequest<'_>) -> Result<BridgeResponse, ClientError> {
        let mut line =
            serde_json::to_string(request).map_err(|e| ClientError::Protocol(e.to_string()))?;
        line.push('\n');

        // Hold the stdin lock across write + read so responses pair with
        // their requests.
        let mut stdin = self.stdin.lock().expect("bridge stdin mutex poisoned");
        stdin.write_all(line.as_bytes()).map_err(ClientError::Io)?;
        stdin.flush().map_err(ClientError::Io)?;

        match self.responses.recv_timeout(self.timeout) {
            Ok(line) => serde_json::from_str(&line)
                .map_err(|e| ClientError::Protocol(format!("malformed response: {e}"))),
            Err(RecvTimeoutError::Timeout) => Err(ClientError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::Closed),
        }
    }
}

impl RemoteClient for BridgeClient {
    fn grant_read(&self, folder_id: &str, email: &str) -> Result<String, GrantError> {
        let response = self
            .call(&BridgeRequest::GrantRead { folder_id, email })
            .map_err(|e| GrantError::new(ErrorCode::Unknown, e.to_string()))?;
        if response.ok {
            response
                .permission_id
                .ok_or_else(|| GrantError::new(ErrorCode::Unknown, "response missing permissionId"))
        } else {
            Err(GrantError::new(
                response.error_code.unwrap_or(ErrorCode::Unknown),
                response.error.unwrap_or_else(|| "grant failed".to_string()),
            ))
        }
    }

    fn list_sheets(&self, document_id: &str) -> Result<Vec<SheetInfo>, ClientError> {
        let response = self.call(&BridgeRequest::ListSheets { document_id })?;
        if response.ok {
            Ok(response.sheets.unwrap_or_default())
        } else {
            Err(ClientError::Remote(
                response
                    .error
                    .unwrap_or_else(|| "listSheets failed".to_string()),
            ))
        }
    }

    fn batch_write_cells(
        &self,
        document_id: &str,
        sheet_title: &str,
        updates: &[CellUpdate],
    ) -> Result<(), ClientError> {
        let response = self.call(&BridgeRequest::BatchWriteCells {
            document_id,
            sheet_title,
            updates,
        })?;
        if response.ok {
            Ok(())
        } else {
            Err(ClientError::Remote(
                response
                    .error
                    .unwrap_or_else(|| "batchWriteCells failed".to_string()),
            ))
        }
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

// ============================================================================
// FakeClient
// ============================================================================

/// Scripted failure mode for [`FakeClient`].
#[derive(Clone, Copy, Debug)]
pub enum FakeFailure {
    /// Return a classified grant error.
    Code(ErrorCode),
    /// Panic inside the call (exercises worker panic isolation).
    Panic,
}

/// In-memory test double.
///
/// Records every grant and batch write so tests can assert at-most-once
/// dispatch and flush contents; per-email failures and batch-write failures
/// are scriptable.
#[derive(Default)]
pub struct FakeClient {
    permission_seq: AtomicU64,
    grants: Mutex<Vec<(String, String)>>,
    failures: Mutex<HashMap<String, FakeFailure>>,
    sheets: Mutex<Vec<SheetInfo>>,
    batches: Mutex<Vec<(String, String, Vec<CellUpdate>)>>,
    batch_failures_remaining: AtomicU64,
    init_failures: Mutex<Vec<usize>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the sheet list returned by `list_sheets`.
    pub fn set_sheets(&self, sheets: Vec<SheetInfo>) {
        *self.sheets.lock().expect("fake sheets mutex poisoned") = sheets;
    }

    /// Script a failure for every grant to `email`.
    pub fn fail_email(&self, email: &str, failure: FakeFailure) {
        self.failures
            .lock()
            .expect("fake failures mutex poisoned")
            .insert(email.to_string(), failure);
    }

    /// Make the next `n` batch writes fail.
    pub fn fail_next_batches(&self, n: u64) {
        self.batch_failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Make `init_worker` fail for the given worker index.
    pub fn fail_worker_init(&self, worker: usize) {
        self.init_failures
            .lock()
            .expect("fake init mutex poisoned")
            .push(worker);
    }

    /// Every `(folder_id, email)` pair granted so far, in call order.
    pub fn grants(&self) -> Vec<(String, String)> {
        self.grants.lock().expect("fake grants mutex poisoned").clone()
    }

    /// Every accepted batch write, in call order.
    pub fn batches(&self) -> Vec<(String, String, Vec<CellUpdate>)> {
        self.batches.lock().expect("fake batches mutex poisoned").clone()
    }
}

impl RemoteClient for FakeClient {
    fn init_worker(&self, worker: usize) -> Result<(), ClientError> {
        if self
            .init_failures
            .lock()
            .expect("fake init mutex poisoned")
            .contains(&worker)
        {
            return Err(ClientError::Remote(format!("worker {worker} init refused")));
        }
        Ok(())
    }

    fn grant_read(&self, folder_id: &str, email: &str) -> Result<String, GrantError> {
        let scripted = self
            .failures
            .lock()
            .expect("fake failures mutex poisoned")
            .get(email)
            .copied();
        match scripted {
            Some(FakeFailure::Code(code)) => {
                Err(GrantError::new(code, format!("scripted failure for {email}")))
            }
            Some(FakeFailure::Panic) => panic!("scripted panic for {email}"),
            None => {
                self.grants
                    .lock()
                    .expect("fake grants mutex poisoned")
                    .push((folder_id.to_string(), email.to_string()));
                let n = self.permission_seq.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(format!("p{n}"))
            }
        }
    }

    fn list_sheets(&self, _document_id: &str) -> Result<Vec<SheetInfo>, ClientError> {
        let sheets = self.sheets.lock().expect("fake sheets mutex poisoned");
        if sheets.is_empty() {
            Ok(vec![SheetInfo {
                title: "Sheet1".to_string(),
                sheet_id: 0,
            }])
        } else {
            Ok(sheets.clone())
        }
    }

    fn batch_write_cells(
        &self,
        document_id: &str,
        sheet_title: &str,
        updates: &[CellUpdate],
    ) -> Result<(), ClientError> {
        let remaining = self.batch_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.batch_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(ClientError::Remote("scripted batch failure".to_string()));
        }
        self.batches
            .lock()
            .expect("fake batches mutex poisoned")
            .push((
                document_id.to_string(),
                sheet_title.to_string(),
                updates.to_vec(),
            ));
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
