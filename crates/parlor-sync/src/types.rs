//! Shared window-map and delta types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One window as reported by a control socket snapshot: a JSON object
/// holding at least an `id`, usually a `type` and a rect, plus whatever
/// extra properties the window kind attaches. Kept as a raw object so
/// unknown properties survive diffing and merging untouched.
pub type WindowRecord = serde_json::Map<String, Value>;

/// Id-indexed snapshot of one instance's visible windows. A `BTreeMap`
/// so iteration (and therefore delta ordering) is deterministic.
pub type WindowMap = BTreeMap<String, WindowRecord>;

/// Minimal description transforming one [`WindowMap`] into another.
///
/// On the wire each part is omitted when empty; decoding an absent part
/// yields an empty vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Full records for windows present in the new map only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<WindowRecord>,

    /// Ids of windows present in the old map only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,

    /// Records (possibly partial) for windows present in both maps whose
    /// value changed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update: Vec<WindowRecord>,
}

impl Delta {
    /// True when no part carries anything.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty() && self.update.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> WindowRecord {
        v.as_object().expect("object").clone()
    }

    #[test]
    fn empty_delta_serializes_to_empty_object() {
        let json = serde_json::to_string(&Delta::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn absent_parts_decode_as_empty() {
        let delta: Delta = serde_json::from_str(r#"{"remove":["w1"]}"#).unwrap();
        assert!(delta.add.is_empty());
        assert_eq!(delta.remove, vec!["w1".to_string()]);
        assert!(delta.update.is_empty());
    }

    #[test]
    fn populated_parts_round_trip() {
        let delta = Delta {
            add: vec![record(json!({"id": "w1", "type": "plain"}))],
            remove: vec!["w2".into()],
            update: vec![record(json!({"id": "w3", "x": 4}))],
        };
        let encoded = serde_json::to_string(&delta).unwrap();
        let decoded: Delta = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, delta);
        assert!(!decoded.is_empty());
    }
}
