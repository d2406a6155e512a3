//! Snapshot → window map extraction.

use serde_json::Value;

use crate::types::{WindowMap, WindowRecord};

/// Extract an id → record map from a control socket `get_state` snapshot.
///
/// Handles both shapes of the `windows` field: the list the control
/// socket emits and the id-keyed map a relay's canonical state carries.
/// List entries without an `id` are dropped; map entries get a missing
/// `id` backfilled from their key. Every record is normalized so the
/// same window compares equal no matter which shape it arrived in.
pub fn windows_from_state(state: &Value) -> WindowMap {
    let mut windows = WindowMap::new();
    match state.get("windows") {
        Some(Value::Array(list)) => {
            for win in list {
                let Some(obj) = win.as_object() else { continue };
                let norm = normalize_window(obj);
                let Some(id) = norm.get("id").and_then(Value::as_str) else {
                    continue;
                };
                windows.insert(id.to_string(), norm.clone());
            }
        }
        Some(Value::Object(map)) => {
            for (wid, win) in map {
                let Some(obj) = win.as_object() else { continue };
                let mut norm = normalize_window(obj);
                norm.entry("id".to_string())
                    .or_insert_with(|| Value::String(wid.clone()));
                windows.insert(wid.clone(), norm);
            }
        }
        _ => {}
    }
    windows
}

/// Canonicalize legacy `width`/`height` keys to `w`/`h`.
///
/// `w`/`h` always win; the legacy keys only fill them in when absent,
/// and are removed either way so records from old snapshots and current
/// ones compare equal.
pub fn normalize_window(win: &WindowRecord) -> WindowRecord {
    let mut out = win.clone();
    if let Some(width) = out.remove("width") {
        out.entry("w".to_string()).or_insert(width);
    }
    if let Some(height) = out.remove("height") {
        out.entry("h".to_string()).or_insert(height);
    }
    out
}
