//! Shared harness for engine integration tests: a sandboxed config, input
//! artifact writers, and a one-call engine runner wired to the in-memory
//! client and a capturing event sink.

// Each test binary uses a different subset of the harness.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use bulkshare_rs::client::FakeClient;
use bulkshare_rs::config::ShareConfig;
use bulkshare_rs::engine::{Engine, EngineError, RunReport};
use bulkshare_rs::events::{EventEmitter, VecSink};
use bulkshare_rs::lifecycle::ShutdownFlag;
use bulkshare_rs::Recipient;

pub struct Sandbox {
    // Held for its Drop; the path is reachable via config.
    #[allow(dead_code)]
    pub dir: TempDir,
    pub config: ShareConfig,
}

pub fn sandbox() -> Sandbox {
    let dir = TempDir::new().expect("create sandbox");
    let root = dir.path();
    let config = ShareConfig {
        document_id: "doc-1".to_string(),
        sheet_title: "Roster".to_string(),
        folder_map_path: root.join("folder-map.json"),
        recipients_path: root.join("recipient-cache.json"),
        credentials_path: root.join("credentials.json"),
        history_path: root.join("share-history.json"),
        results_path: root.join("share-results.json"),
        workers: 4,
        history_batch: 2,
        rate_limit: Duration::ZERO,
        init_timeout: Duration::from_secs(2),
        update_cache: false,
        ..ShareConfig::default()
    };
    Sandbox { dir, config }
}

impl Sandbox {
    pub fn write_folder_map(&self, entries: &[(&str, &str)]) {
        let map: serde_json::Map<String, serde_json::Value> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        std::fs::write(
            &self.config.folder_map_path,
            serde_json::to_vec_pretty(&map).unwrap(),
        )
        .unwrap();
    }

    pub fn write_recipients(&self, recipients: &[Recipient]) {
        let cache = serde_json::json!({
            "timestamp": "2026-01-01T00:00:00Z",
            "totalParticipants": recipients.len(),
            "participants": recipients,
        });
        std::fs::write(
            &self.config.recipients_path,
            serde_json::to_vec_pretty(&cache).unwrap(),
        )
        .unwrap();
    }

    pub fn history_path(&self) -> &Path {
        &self.config.history_path
    }
}

pub fn recipient(row: u32, name: &str, email: &str, is_shared: bool) -> Recipient {
    Recipient {
        row,
        email: email.to_string(),
        name: name.to_string(),
        is_shared,
        last_log: String::new(),
    }
}

pub struct RunHarness {
    pub report: Result<RunReport, EngineError>,
    pub sink: Arc<VecSink>,
}

pub fn run_engine(config: ShareConfig, client: Arc<FakeClient>) -> RunHarness {
    run_engine_with_shutdown(config, client, ShutdownFlag::new())
}

pub fn run_engine_with_shutdown(
    config: ShareConfig,
    client: Arc<FakeClient>,
    shutdown: ShutdownFlag,
) -> RunHarness {
    let sink = Arc::new(VecSink::new());
    let events = EventEmitter::new(sink.clone());
    let engine = Engine::new(config, client, events, shutdown);
    RunHarness {
        report: engine.run(),
        sink,
    }
}

/// Lines starting with `<tag>: ` from a captured event stream.
pub fn lines_with_tag(lines: &[String], tag: &str) -> Vec<String> {
    let prefix = format!("{tag}: ");
    lines
        .iter()
        .filter(|l| l.starts_with(&prefix))
        .cloned()
        .collect()
}
