//! Window-map diffing and patching.
//!
//! `apply(old, compute(old, new)) == new` holds for every pair of maps;
//! the bridge leans on that to converge instances by re-sending whatever
//! difference is left after a partial application.

use serde_json::Value;

use crate::types::{Delta, WindowMap};

/// Diff two window maps into a minimal delta.
///
/// Returns `None` when the maps are equal (including both empty). Parts
/// are ordered by window id; the ordering carries no protocol meaning
/// but keeps pushed deltas reproducible.
pub fn compute(old: &WindowMap, new: &WindowMap) -> Option<Delta> {
    let mut delta = Delta::default();

    for (wid, win) in new {
        match old.get(wid) {
            None => delta.add.push(win.clone()),
            Some(prev) if prev != win => delta.update.push(win.clone()),
            Some(_) => {}
        }
    }
    for wid in old.keys() {
        if !new.contains_key(wid) {
            delta.remove.push(wid.clone());
        }
    }

    if delta.is_empty() {
        None
    } else {
        Some(delta)
    }
}

/// Apply a delta to a window map, returning the new map.
///
/// `add` inserts or overwrites by the record's own id; `remove` of an
/// unknown id is a no-op; `update` upserts: it shallow-merges into the
/// existing record, or creates the record when the id was never seen.
pub fn apply(current: &WindowMap, delta: &Delta) -> WindowMap {
    let mut result = current.clone();

    for win in &delta.add {
        if let Some(id) = win.get("id").and_then(Value::as_str) {
            result.insert(id.to_string(), win.clone());
        }
    }
    for wid in &delta.remove {
        result.remove(wid);
    }
    for win in &delta.update {
        let Some(id) = win.get("id").and_then(Value::as_str) else {
            continue;
        };
        match result.get_mut(id) {
            Some(existing) => {
                for (k, v) in win {
                    existing.insert(k.clone(), v.clone());
                }
            }
            None => {
                result.insert(id.to_string(), win.clone());
            }
        }
    }

    result
}
