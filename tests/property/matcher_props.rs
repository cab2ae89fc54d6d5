//! Matcher properties: determinism, locality, and substring soundness.
//!
//! The substring stage may return any entry satisfying the bidirectional
//! substring predicate, so properties assert membership in the valid set
//! rather than a specific entry.

use proptest::prelude::*;

use bulkshare_rs::api::{normalize_name, FolderMap};
use bulkshare_rs::find_folder_id;

/// ASCII-only names: case/whitespace round-trips are identity-preserving in
/// this subset, which the invariance properties rely on.
fn name_strategy() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-z]{1,8}( [a-z]{1,8}){0,2}").unwrap()
}

fn map_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    proptest::collection::vec((name_strategy(), "[a-z0-9]{1,6}"), 0..8)
}

fn build_map(entries: &[(String, String)]) -> FolderMap {
    FolderMap::from_raw(entries.iter().cloned())
}

/// Does `id` belong to an entry that legitimately matches `name`?
fn is_valid_match(map: &FolderMap, name: &str, id: &str) -> bool {
    let normalized = normalize_name(name);
    map.iter().any(|(key, entry_id)| {
        entry_id == id
            && (key == normalized
                || key.contains(normalized.as_str())
                || normalized.contains(key))
    })
}

proptest! {
    /// Same map + same name → same answer, independent of call order.
    #[test]
    fn deterministic_across_calls(entries in map_strategy(), name in name_strategy()) {
        let map = build_map(&entries);
        let first = find_folder_id(&map, &name).map(str::to_string);
        for _ in 0..3 {
            prop_assert_eq!(find_folder_id(&map, &name).map(str::to_string), first.clone());
        }
    }

    /// Any returned id corresponds to an entry satisfying the stage
    /// predicates (exact or bidirectional substring).
    #[test]
    fn returned_id_satisfies_match_predicate(
        entries in map_strategy(),
        name in name_strategy(),
    ) {
        let map = build_map(&entries);
        if let Some(id) = find_folder_id(&map, &name) {
            prop_assert!(is_valid_match(&map, &name, id));
        }
    }

    /// An exact (normalized) key always resolves to its own id.
    #[test]
    fn exact_key_always_hits(entries in map_strategy(), idx in 0usize..8) {
        let map = build_map(&entries);
        let picked = map
            .iter()
            .nth(idx % map.len().max(1))
            .map(|(key, _)| key.to_string());
        if let Some(key) = picked {
            let id = map.get(&key).unwrap().to_string();
            prop_assert_eq!(find_folder_id(&map, &key), Some(id.as_str()));
        }
    }

    /// Leading/trailing whitespace and ASCII case do not change the answer.
    #[test]
    fn invariant_under_trim_and_case(entries in map_strategy(), name in name_strategy()) {
        let map = build_map(&entries);
        let base = find_folder_id(&map, &name).map(str::to_string);
        let padded = format!("  {}  ", name.to_uppercase());
        prop_assert_eq!(find_folder_id(&map, &padded).map(str::to_string), base);
    }

    /// A miss means no entry satisfies the substring predicate either.
    #[test]
    fn miss_implies_no_valid_entry(entries in map_strategy(), name in name_strategy()) {
        let map = build_map(&entries);
        if find_folder_id(&map, &name).is_none() {
            let normalized = normalize_name(&name);
            for (key, _) in map.iter() {
                prop_assert!(!(key == normalized
                    || key.contains(normalized.as_str())
                    || normalized.contains(key)));
            }
        }
    }
}
