//! Turning remote deltas into control-socket commands.

use parlor_sync::{Delta, WindowRecord};
use serde_json::Value;

use crate::ipc::ControlPort;

/// Window type used when an add-record does not carry one.
pub const DEFAULT_WINDOW_TYPE: &str = "plain";

const DEFAULT_W: i64 = 40;
const DEFAULT_H: i64 = 20;

/// One control-socket command that succeeded during delta application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedCommand {
    Create { id: Option<String>, kind: String },
    Close { id: String },
    Move { id: String, x: i64, y: i64 },
}

/// Push a remote delta into the local instance, one command per entry.
///
/// Adds become `create_window` (the instance assigns its own id), removes
/// become `close_window`, updates become `move_window` carrying only the
/// new position; size changes are not propagated on update. Individual
/// command failures are logged and swallowed; the next reconciliation
/// cycle re-derives whatever difference is left. Returns the commands
/// that succeeded.
pub async fn apply_to_port(port: &dyn ControlPort, delta: &Delta) -> Vec<AppliedCommand> {
    let mut applied = Vec::new();

    for win in &delta.add {
        let kind = win
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_WINDOW_TYPE);
        let rect = rect_of(win).unwrap_or(win);
        let x = rect_i64(rect, &["x"], 0);
        let y = rect_i64(rect, &["y"], 0);
        let w = rect_i64(rect, &["w", "width"], DEFAULT_W);
        let h = rect_i64(rect, &["h", "height"], DEFAULT_H);
        let params = [
            ("type", kind.to_string()),
            ("x", x.to_string()),
            ("y", y.to_string()),
            ("w", w.to_string()),
            ("h", h.to_string()),
        ];
        if port.command("create_window", &params).await {
            applied.push(AppliedCommand::Create {
                id: win.get("id").and_then(Value::as_str).map(str::to_string),
                kind: kind.to_string(),
            });
        } else {
            tracing::warn!(kind = %kind, "create_window failed");
        }
    }

    for wid in &delta.remove {
        if port.command("close_window", &[("id", wid.clone())]).await {
            applied.push(AppliedCommand::Close { id: wid.clone() });
        } else {
            tracing::warn!(id = %wid, "close_window failed");
        }
    }

    for win in &delta.update {
        let Some(wid) = win.get("id").and_then(Value::as_str) else {
            continue;
        };
        let Some(rect) = rect_of(win) else { continue };
        let x = rect_i64(rect, &["x"], 0);
        let y = rect_i64(rect, &["y"], 0);
        let params = [
            ("id", wid.to_string()),
            ("x", x.to_string()),
            ("y", y.to_string()),
        ];
        if port.command("move_window", &params).await {
            applied.push(AppliedCommand::Move {
                id: wid.to_string(),
                x,
                y,
            });
        } else {
            tracing::warn!(id = %wid, "move_window failed");
        }
    }

    applied
}

/// The rect carried by a delta record: a nested `rect`/`bounds` object
/// when present, else the record itself when it holds flat coordinate
/// keys (delta flat format).
fn rect_of(win: &WindowRecord) -> Option<&WindowRecord> {
    for key in ["rect", "bounds"] {
        if let Some(rect) = win.get(key).and_then(Value::as_object) {
            return Some(rect);
        }
    }
    const FLAT: [&str; 6] = ["x", "y", "w", "h", "width", "height"];
    if FLAT.iter().any(|k| win.contains_key(*k)) {
        Some(win)
    } else {
        None
    }
}

/// First of `keys` holding a number, else `default`.
fn rect_i64(rect: &WindowRecord, keys: &[&str], default: i64) -> i64 {
    keys.iter()
        .find_map(|k| {
            let v = rect.get(*k)?;
            v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64))
        })
        .unwrap_or(default)
}
