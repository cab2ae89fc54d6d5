//! Fuzzy recipient-name → folder-id resolution.
//!
//! Names in the roster document are human-entered and drift from folder
//! names by trailing punctuation, honorifics, or spacing. The matcher runs
//! three ordered stages over the preloaded [`FolderMap`]; the first hit wins:
//!
//! 1. **Exact normalized** — lower-case + trim, direct lookup.
//! 2. **Whitespace-collapsed** — internal whitespace runs collapsed to a
//!    single space, direct lookup.
//! 3. **Substring bidirectional** — scan entries in lexicographic key order;
//!    the first entry whose key contains the query or whose query contains
//!    the key wins.
//!
//! The function is pure over the map: same map + same name → same answer,
//! independent of call order. Stage 3 is intentionally permissive and can
//! pair lexically-overlapping names; no longest-match pass is applied, and
//! the lexicographic tie-break is documented behavior rather than contract.

use crate::api::{normalize_name, FolderMap};

/// Resolve a recipient name to a folder id, or `None` if no stage matches.
pub fn find_folder_id<'a>(map: &'a FolderMap, name: &str) -> Option<&'a str> {
    let normalized = normalize_name(name);
    if normalized.is_empty() {
        return None;
    }

    // Stage 1: exact normalized.
    if let Some(id) = map.get(&normalized) {
        return Some(id);
    }

    // Stage 2: whitespace-collapsed.
    let collapsed = collapse_whitespace(&normalized);
    if collapsed != normalized {
        if let Some(id) = map.get(&collapsed) {
            return Some(id);
        }
    }

    // Stage 3: substring, either direction, first hit in key order.
    map.iter()
        .find(|(key, _)| key.contains(normalized.as_str()) || normalized.contains(*key))
        .map(|(_, id)| id)
}

/// Collapse internal whitespace runs to a single ASCII space.
fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_run = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !in_run {
                out.push(' ');
            }
            in_run = true;
        } else {
            out.push(ch);
            in_run = false;
        }
    }
    out
}
