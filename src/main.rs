use std::process;
use std::sync::Arc;

use bulkshare_rs::client::{BridgeClient, RemoteClient};
use bulkshare_rs::config;
use bulkshare_rs::engine::{Engine, RunStatus};
use bulkshare_rs::events::EventEmitter;
use bulkshare_rs::lifecycle::ShutdownFlag;

fn main() {
    let config = config::parse_args();

    if !config.credentials_path.exists() {
        eprintln!(
            "bulkshare-rs: credential file not found: {}",
            config.credentials_path.display()
        );
        process::exit(1);
    }

    let shutdown = ShutdownFlag::new();
    shutdown.install();

    let client: Arc<dyn RemoteClient> =
        match BridgeClient::spawn(&config.bridge_command, &config.credentials_path) {
            Ok(client) => Arc::new(client),
            Err(err) => {
                eprintln!(
                    "bulkshare-rs: cannot start bridge {}: {err}",
                    config.bridge_command.display()
                );
                process::exit(1);
            }
        };

    let engine = Engine::new(config, client, EventEmitter::stdout(), shutdown);
    match engine.run() {
        Ok(report) => match report.status {
            RunStatus::Completed => {}
            RunStatus::Interrupted => {
                eprintln!("bulkshare-rs: interrupted; history saved for resume");
                process::exit(130);
            }
        },
        Err(err) => {
            eprintln!("bulkshare-rs: {err}");
            process::exit(1);
        }
    }
}
