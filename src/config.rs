//! Run configuration from environment variables and CLI flags.
//!
//! Hand-rolled `--flag=value` parsing (no clap dependency) in the usual
//! shape: a pure `parse_from` that tests can drive, and a `parse_args`
//! wrapper that prints usage and exits on user error.
//!
//! # Grammar
//!
//! ```text
//! bulkshare-rs [--folder-map=<path>] [--recipients=<path>]
//!              [--credentials=<path>] [--history=<path>] [--results=<path>]
//!              [--bridge=<path>] [--workers=<N>] [--batch=<N>]
//!              [--rate-ms=<N>] [--init-timeout-ms=<N>] [--update-cache]
//! bulkshare-rs --help | -h
//! ```
//!
//! # Environment
//!
//! `SHARE_DOCUMENT_ID` and `SHARE_SHEET_TITLE` are required; a run without
//! them exits non-zero with a diagnostic listing the missing names.
//! `SHARE_WORKERS` and `SHARE_HISTORY_BATCH` are optional and can be
//! overridden by the corresponding flags.

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DOCUMENT_ID: &str = "SHARE_DOCUMENT_ID";
pub const ENV_SHEET_TITLE: &str = "SHARE_SHEET_TITLE";
pub const ENV_WORKERS: &str = "SHARE_WORKERS";
pub const ENV_HISTORY_BATCH: &str = "SHARE_HISTORY_BATCH";

/// Default worker-pool size.
pub const DEFAULT_WORKERS: usize = 16;
/// Default history save cadence (outcomes between saves).
pub const DEFAULT_HISTORY_BATCH: usize = 10;
/// Default per-worker post-call sleep.
pub const DEFAULT_RATE_MS: u64 = 100;
/// Default worker readiness deadline.
pub const DEFAULT_INIT_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// Configuration
// ============================================================================

/// Everything a run needs, resolved from env + flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareConfig {
    /// Remote document id (`SHARE_DOCUMENT_ID`).
    pub document_id: String,
    /// Sheet title within the document (`SHARE_SHEET_TITLE`). Resolved
    /// case-insensitively against `list_sheets` at flush time.
    pub sheet_title: String,
    pub folder_map_path: PathBuf,
    pub recipients_path: PathBuf,
    pub credentials_path: PathBuf,
    pub history_path: PathBuf,
    pub results_path: PathBuf,
    /// Helper executable for the stdio bridge client.
    pub bridge_command: PathBuf,
    pub workers: usize,
    /// Outcomes between incremental history saves.
    pub history_batch: usize,
    pub rate_limit: Duration,
    pub init_timeout: Duration,
    /// Write successes through to the recipient cache and emit
    /// `DASHBOARD_UPDATE` events.
    pub update_cache: bool,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            document_id: String::new(),
            sheet_title: String::new(),
            folder_map_path: PathBuf::from("folder-map.json"),
            recipients_path: PathBuf::from("recipient-cache.json"),
            credentials_path: PathBuf::from("credentials.json"),
            history_path: PathBuf::from("share-history.json"),
            results_path: PathBuf::from("share-results.json"),
            bridge_command: PathBuf::from("bulkshare-bridge"),
            workers: DEFAULT_WORKERS,
            history_batch: DEFAULT_HISTORY_BATCH,
            rate_limit: Duration::from_millis(DEFAULT_RATE_MS),
            init_timeout: Duration::from_millis(DEFAULT_INIT_TIMEOUT_MS),
            update_cache: false,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// User-facing configuration failure.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `--help` was requested.
    Help,
    /// Unknown or malformed flag.
    Usage(String),
    /// Required environment variables are missing.
    MissingEnv(Vec<&'static str>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Help => write!(f, "help requested"),
            Self::Usage(detail) => write!(f, "{detail}"),
            Self::MissingEnv(names) => {
                write!(f, "missing required environment variables: {}", names.join(", "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Parsing
// ============================================================================

/// Parse process args and environment, exiting on user error.
///
/// Exit codes follow CLI convention: 0 for `--help`, 2 for usage errors,
/// 1 for missing environment.
pub fn parse_args() -> ShareConfig {
    let lookup = |name: &str| env::var(name).ok();
    match parse_from(env::args_os().skip(1), &lookup) {
        Ok(config) => config,
        Err(ConfigError::Help) => {
            print_usage();
            std::process::exit(0);
        }
        Err(ConfigError::Usage(detail)) => {
            eprintln!("error: {detail}");
            eprintln!();
            print_usage();
            std::process::exit(2);
        }
        Err(err @ ConfigError::MissingEnv(_)) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

/// Pure parser over an argument iterator and an env lookup.
pub fn parse_from<I>(
    args: I,
    env_lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<ShareConfig, ConfigError>
where
    I: IntoIterator<Item = OsString>,
{
    let mut config = ShareConfig::default();

    let mut missing = Vec::new();
    match env_lookup(ENV_DOCUMENT_ID) {
        Some(v) if !v.is_empty() => config.document_id = v,
        _ => missing.push(ENV_DOCUMENT_ID),
    }
    match env_lookup(ENV_SHEET_TITLE) {
        Some(v) if !v.is_empty() => config.sheet_title = v,
        _ => missing.push(ENV_SHEET_TITLE),
    }
    if let Some(v) = env_lookup(ENV_WORKERS) {
        config.workers = parse_count(&v, ENV_WORKERS)?;
    }
    if let Some(v) = env_lookup(ENV_HISTORY_BATCH) {
        config.history_batch = parse_count(&v, ENV_HISTORY_BATCH)?;
    }

    for arg in args {
        let Some(flag) = arg.to_str() else {
            return Err(ConfigError::Usage(format!(
                "invalid (non-UTF-8) argument: {}",
                arg.to_string_lossy()
            )));
        };

        if let Some(rest) = flag.strip_prefix("--folder-map=") {
            config.folder_map_path = PathBuf::from(rest);
            continue;
        }
        if let Some(rest) = flag.strip_prefix("--recipients=") {
            config.recipients_path = PathBuf::from(rest);
            continue;
        }
        if let Some(rest) = flag.strip_prefix("--credentials=") {
            config.credentials_path = PathBuf::from(rest);
            continue;
        }
        if let Some(rest) = flag.strip_prefix("--history=") {
            config.history_path = PathBuf::from(rest);
            continue;
        }
        if let Some(rest) = flag.strip_prefix("--results=") {
            config.results_path = PathBuf::from(rest);
            continue;
        }
        if let Some(rest) = flag.strip_prefix("--bridge=") {
            config.bridge_command = PathBuf::from(rest);
            continue;
        }
        if let Some(rest) = flag.strip_prefix("--workers=") {
            config.workers = parse_count(rest, "--workers")?;
            continue;
        }
        if let Some(rest) = flag.strip_prefix("--batch=") {
            config.history_batch = parse_count(rest, "--batch")?;
            continue;
        }
        if let Some(rest) = flag.strip_prefix("--rate-ms=") {
            config.rate_limit = Duration::from_millis(parse_millis(rest, "--rate-ms")?);
            continue;
        }
        if let Some(rest) = flag.strip_prefix("--init-timeout-ms=") {
            config.init_timeout = Duration::from_millis(parse_millis(rest, "--init-timeout-ms")?);
            continue;
        }
        match flag {
            "--update-cache" => config.update_cache = true,
            "--help" | "-h" => return Err(ConfigError::Help),
            _ => {
                return Err(ConfigError::Usage(format!("unknown flag: {flag}")));
            }
        }
    }

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnv(missing));
    }
    Ok(config)
}

fn parse_count(s: &str, what: &str) -> Result<usize, ConfigError> {
    match s.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        Ok(_) => Err(ConfigError::Usage(format!("{what} must be >= 1"))),
        Err(_) => Err(ConfigError::Usage(format!("invalid {what} value: {s}"))),
    }
}

fn parse_millis(s: &str, what: &str) -> Result<u64, ConfigError> {
    s.parse::<u64>()
        .map_err(|_| ConfigError::Usage(format!("invalid {what} value: {s}")))
}

fn print_usage() {
    eprintln!(
        "usage: bulkshare-rs [OPTIONS]

Grants read access on mapped folders to every unshared roster recipient,
then writes status/log cells back to the remote document.

REQUIRED ENVIRONMENT:
    {ENV_DOCUMENT_ID}        Remote document id
    {ENV_SHEET_TITLE}        Sheet title for cell writes

OPTIONS:
    --folder-map=<path>      Folder map JSON (default: folder-map.json)
    --recipients=<path>      Recipient cache JSON (default: recipient-cache.json)
    --credentials=<path>     Credential file for the bridge (default: credentials.json)
    --history=<path>         Resume snapshot (default: share-history.json)
    --results=<path>         Results artifact (default: share-results.json)
    --bridge=<path>          Bridge helper executable (default: bulkshare-bridge)
    --workers=<N>            Worker threads (default: {DEFAULT_WORKERS}, env {ENV_WORKERS})
    --batch=<N>              Outcomes between history saves (default: {DEFAULT_HISTORY_BATCH}, env {ENV_HISTORY_BATCH})
    --rate-ms=<N>            Per-worker post-call sleep (default: {DEFAULT_RATE_MS})
    --init-timeout-ms=<N>    Worker readiness deadline (default: {DEFAULT_INIT_TIMEOUT_MS})
    --update-cache           Write successes through to the recipient cache
    --help, -h               Show this help"
    );
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn env_full(name: &str) -> Option<String> {
        match name {
            ENV_DOCUMENT_ID => Some("doc-1".to_string()),
            ENV_SHEET_TITLE => Some("Roster".to_string()),
            _ => None,
        }
    }

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn defaults_with_required_env() {
        let config = parse_from(args(&[]), &env_full).unwrap();
        assert_eq!(config.document_id, "doc-1");
        assert_eq!(config.sheet_title, "Roster");
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.history_batch, DEFAULT_HISTORY_BATCH);
        assert_eq!(config.rate_limit, Duration::from_millis(100));
        assert!(!config.update_cache);
    }

    #[test]
    fn missing_env_lists_all_names() {
        let err = parse_from(args(&[]), &|_| None).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingEnv(vec![ENV_DOCUMENT_ID, ENV_SHEET_TITLE])
        );
    }

    #[test]
    fn empty_env_counts_as_missing() {
        let lookup = |name: &str| match name {
            ENV_DOCUMENT_ID => Some(String::new()),
            ENV_SHEET_TITLE => Some("Roster".to_string()),
            _ => None,
        };
        let err = parse_from(args(&[]), &lookup).unwrap_err();
        assert_eq!(err, ConfigError::MissingEnv(vec![ENV_DOCUMENT_ID]));
    }

    #[test]
    fn flags_override_env() {
        let lookup = |name: &str| match name {
            ENV_WORKERS => Some("4".to_string()),
            other => env_full(other),
        };
        let config = parse_from(args(&["--workers=8", "--update-cache"]), &lookup).unwrap();
        assert_eq!(config.workers, 8);
        assert!(config.update_cache);
    }

    #[test]
    fn env_worker_count_applies_without_flag() {
        let lookup = |name: &str| match name {
            ENV_WORKERS => Some("4".to_string()),
            other => env_full(other),
        };
        let config = parse_from(args(&[]), &lookup).unwrap();
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn paths_and_timings_parse() {
        let config = parse_from(
            args(&[
                "--folder-map=/data/map.json",
                "--recipients=/data/rcpt.json",
                "--history=/tmp/h.json",
                "--rate-ms=250",
                "--init-timeout-ms=500",
                "--batch=3",
            ]),
            &env_full,
        )
        .unwrap();
        assert_eq!(config.folder_map_path, PathBuf::from("/data/map.json"));
        assert_eq!(config.recipients_path, PathBuf::from("/data/rcpt.json"));
        assert_eq!(config.history_path, PathBuf::from("/tmp/h.json"));
        assert_eq!(config.rate_limit, Duration::from_millis(250));
        assert_eq!(config.init_timeout, Duration::from_millis(500));
        assert_eq!(config.history_batch, 3);
    }

    #[test]
    fn zero_workers_rejected() {
        let err = parse_from(args(&["--workers=0"]), &env_full).unwrap_err();
        assert!(matches!(err, ConfigError::Usage(_)));
    }

    #[test]
    fn unknown_flag_rejected() {
        let err = parse_from(args(&["--frobnicate"]), &env_full).unwrap_err();
        assert!(matches!(err, ConfigError::Usage(_)));
    }

    #[test]
    fn help_flag_short_circuits() {
        let err = parse_from(args(&["-h"]), &|_| None).unwrap_err();
        assert_eq!(err, ConfigError::Help);
    }
}
