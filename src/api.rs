//! Core data model shared across the sharing engine.
//!
//! Everything here crosses at least one seam (engine to worker pool, engine
//! to artifacts on disk, engine to remote client), so the types are
//! plain data with serde derives matching the JSON artifacts produced by
//! the external walker/loader tools.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Recipients
// ============================================================================

/// One row of the roster document, as produced by the recipient-loader.
///
/// `row` is the 1-based row index in the remote document; it is the anchor
/// for the status/log cell writes. `name` is human-entered free text and may
/// differ from the matching folder name by case, spacing, or trailing
/// decoration — the matcher absorbs that.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub row: u32,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub last_log: String,
}

impl Recipient {
    /// De-duplication key persisted across runs.
    ///
    /// Raw (untrimmed, case-preserved) `name|email`, matching the document
    /// text exactly so keys survive loader re-runs.
    pub fn processed_key(&self) -> String {
        format!("{}|{}", self.name, self.email)
    }
}

// ============================================================================
// Folder map
// ============================================================================

/// Mapping from normalized folder name to folder id.
///
/// Keys are normalized (lower-cased, trimmed) at load time. A `BTreeMap`
/// keeps iteration in lexicographic key order, which is the documented
/// tie-break order for the matcher's substring stage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FolderMap {
    entries: BTreeMap<String, String>,
}

impl FolderMap {
    /// Build a map from raw (display-name, id) pairs, normalizing keys.
    ///
    /// Later duplicates of the same normalized key win; the walker emits
    /// unique display names so this only matters for pathological inputs.
    pub fn from_raw<I>(raw: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut entries = BTreeMap::new();
        for (name, id) in raw {
            entries.insert(normalize_name(&name), id);
        }
        Self { entries }
    }

    /// Exact lookup by already-normalized key.
    pub fn get(&self, normalized: &str) -> Option<&str> {
        self.entries.get(normalized).map(String::as_str)
    }

    /// Entries in lexicographic key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lower-case and trim a folder or recipient name.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

// ============================================================================
// Tasks and outcomes
// ============================================================================

/// A unit of work dispatched to a worker: grant `email` read access to
/// `folder_id`. Carries the full recipient so the outcome can be tied back
/// to its roster row without a coordinator-side lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub folder_id: String,
    pub email: String,
    pub recipient: Recipient,
}

/// Grant failure classification returned by the remote service.
///
/// The wire values are stable and appear verbatim in result artifacts and
/// `RESULTS_UPDATE` events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PermissionDenied,
    RateLimited,
    NotFound,
    EmailInvalid,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::RateLimited => "RATE_LIMITED",
            Self::NotFound => "NOT_FOUND",
            Self::EmailInvalid => "EMAIL_INVALID",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Non-fatal per-recipient issue class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    NoFolder,
}

/// Outcome of processing one recipient, appended to the result list and the
/// history snapshot. Never mutated after the engine stamps `timestamp`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<IssueType>,
    pub recipient: Recipient,
    /// `None` when no folder matched (the task was never built).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    /// Engine-stamped ISO-8601 receipt time.
    #[serde(default)]
    pub timestamp: String,
}

impl ShareResult {
    /// Successful grant.
    pub fn granted(recipient: Recipient, folder_id: String, permission_id: String) -> Self {
        Self {
            success: true,
            permission_id: Some(permission_id),
            error: None,
            error_code: None,
            issue_type: None,
            recipient,
            folder_id: Some(folder_id),
            timestamp: String::new(),
        }
    }

    /// Worker-reported grant failure.
    pub fn failed(
        recipient: Recipient,
        folder_id: String,
        error: String,
        error_code: ErrorCode,
    ) -> Self {
        Self {
            success: false,
            permission_id: None,
            error: Some(error),
            error_code: Some(error_code),
            issue_type: None,
            recipient,
            folder_id: Some(folder_id),
            timestamp: String::new(),
        }
    }

    /// Pre-dispatch matching miss.
    pub fn no_folder(recipient: Recipient) -> Self {
        Self {
            success: false,
            permission_id: None,
            error: Some("No folder found".to_string()),
            error_code: None,
            issue_type: Some(IssueType::NoFolder),
            recipient,
            folder_id: None,
            timestamp: String::new(),
        }
    }

    /// True for pre-dispatch matching misses.
    pub fn is_no_folder(&self) -> bool {
        self.issue_type == Some(IssueType::NoFolder)
    }
}

// ============================================================================
// Cell updates
// ============================================================================

/// Pending write to the remote document: a row range relative to the sheet
/// (e.g. `"I2"`) and the value to place there. The sheet title is resolved
/// once at flush time and supplied alongside the batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellUpdate {
    pub row_range: String,
    pub value: String,
}

impl CellUpdate {
    pub fn new(row_range: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            row_range: row_range.into(),
            value: value.into(),
        }
    }

    /// Status cell (`I` column) for a roster row.
    pub fn status(row: u32, shared: bool) -> Self {
        Self::new(format!("I{row}"), if shared { "TRUE" } else { "FALSE" })
    }

    /// Log cell (`J` column) for a roster row.
    pub fn log(row: u32, message: impl Into<String>) -> Self {
        Self::new(format!("J{row}"), message)
    }
}

/// A sheet within the remote document, as reported by `list_sheets`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetInfo {
    pub title: String,
    pub sheet_id: i64,
}

// ============================================================================
// Time
// ============================================================================

/// Current wall-clock time as ISO-8601 with second precision (UTC).
///
/// This is the single timestamp format used in cell logs, history snapshots,
/// and result artifacts.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ============================================================================
// Tests
// ============================================================================
