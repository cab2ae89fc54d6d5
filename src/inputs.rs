//! Input artifacts: folder map and recipient cache.
//!
//! Both files are produced by external tools (the drive-walker and the
//! recipient-loader) and are read-only inputs to the engine, except that
//! `--update-cache` rewrites the recipient cache as grants land. Missing or
//! malformed inputs are fatal: the engine refuses to start rather than run
//! against a partial roster.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::api::{FolderMap, Recipient};

/// Fatal input-artifact failure.
#[derive(Debug)]
pub enum InputError {
    /// The file could not be read.
    Io(PathBuf, io::Error),
    /// The file is not the expected JSON shape.
    Parse(PathBuf, serde_json::Error),
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(path, err) => write!(f, "cannot read {}: {err}", path.display()),
            Self::Parse(path, err) => write!(f, "malformed input {}: {err}", path.display()),
        }
    }
}

impl std::error::Error for InputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(_, err) => Some(err),
            Self::Parse(_, err) => Some(err),
        }
    }
}

/// Recipient-cache artifact written by the loader.
///
/// Unknown fields are preserved-by-ignoring: the loader may add fields this
/// engine does not care about.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecipientCache {
    pub timestamp: String,
    pub total_participants: u64,
    pub participants: Vec<Recipient>,
}

/// Load the folder map: a JSON object `{display name: folder id}`.
///
/// Display names are normalized (lower-cased, trimmed) into the map keys.
pub fn load_folder_map(path: &Path) -> Result<FolderMap, InputError> {
    let data = fs::read(path).map_err(|e| InputError::Io(path.to_path_buf(), e))?;
    let raw: BTreeMap<String, String> =
        serde_json::from_slice(&data).map_err(|e| InputError::Parse(path.to_path_buf(), e))?;
    Ok(FolderMap::from_raw(raw))
}

/// Load the recipient cache.
pub fn load_recipient_cache(path: &Path) -> Result<RecipientCache, InputError> {
    let data = fs::read(path).map_err(|e| InputError::Io(path.to_path_buf(), e))?;
    serde_json::from_slice(&data).map_err(|e| InputError::Parse(path.to_path_buf(), e))
}

/// Rewrite the recipient cache (write-through after a successful grant).
///
/// Same temp-file + rename discipline as the history store: the cache is
/// also read by the dashboard while we run.
pub fn store_recipient_cache(path: &Path, cache: &RecipientCache) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(cache).map_err(io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, path)
}
