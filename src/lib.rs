//! Resumable bulk-sharing engine for remote storage folders.
//!
//! Grants read access on a large collection of remote folders to recipients
//! listed in a tabular roster document, then writes status/log cells back so
//! the work is idempotent across runs. The hard part lives here: a
//! fixed-size worker pool over a rate-limited remote API, incremental
//! history persistence for crash/Ctrl-C resume, de-duplication from two
//! truth sources, self-validating aggregate counters, and a structured
//! progress event stream for an external observer.
//!
//! # Module layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`api`] | Core data model (recipients, folder map, tasks, results, cells) |
//! | [`config`] | Env + CLI configuration |
//! | [`matcher`] | Three-stage fuzzy name → folder-id lookup |
//! | [`client`] | `RemoteClient` capability, bridge client, test fake |
//! | [`counters`] | Aggregate counters with invariant repair |
//! | [`history`] | Resume snapshot load/save/delete |
//! | [`events`] | Tagged line events and sinks |
//! | [`pool`] | Fixed-size worker pool over channels |
//! | [`engine`] | Run coordinator |
//! | [`inputs`] | Folder-map / recipient-cache artifacts |
//! | [`results`] | Final results artifact |
//! | [`lifecycle`] | Shutdown signaling |
//!
//! # Inputs and outputs
//!
//! Reads the walker's folder map (`{name: id}` JSON) and the loader's
//! recipient cache; writes a transient history snapshot (deleted on clean
//! completion), a results artifact, and two cells per processed recipient
//! in the remote document (`I<row>` status, `J<row>` log).

pub mod api;
pub mod client;
pub mod config;
pub mod counters;
pub mod engine;
pub mod events;
pub mod history;
pub mod inputs;
pub mod lifecycle;
pub mod matcher;
pub mod pool;
pub mod results;

pub use api::{CellUpdate, ErrorCode, FolderMap, IssueType, Recipient, ShareResult, SheetInfo, Task};
pub use client::{BridgeClient, ClientError, FakeClient, FakeFailure, GrantError, RemoteClient};
pub use config::ShareConfig;
pub use counters::ProgressCounters;
pub use engine::{Engine, EngineError, RunReport, RunStatus};
pub use events::{EventEmitter, EventSink, StdoutSink, VecSink};
pub use history::{HistorySnapshot, HistoryStore};
pub use lifecycle::ShutdownFlag;
pub use matcher::find_folder_id;
pub use pool::{PoolConfig, WorkerPool};
