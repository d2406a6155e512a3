//! Chat relay between the local instance and the room.

use serde::Deserialize;
use serde_json::Value;

use crate::ipc::ControlPort;

/// One line of the local chat log, as carried in a `get_state` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatEntry {
    #[serde(default)]
    pub seq: i64,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub text: String,
}

/// Chat log entries with `seq` beyond the cursor, in increasing seq order.
pub fn entries_after(state: &Value, last_seq: i64) -> Vec<ChatEntry> {
    let Some(log) = state.get("chat_log").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut entries: Vec<ChatEntry> = log
        .iter()
        .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
        .filter(|entry: &ChatEntry| entry.seq > last_seq)
        .collect();
    entries.sort_by_key(|entry| entry.seq);
    entries
}

/// Whether an inbound chat message should reach the local sink.
///
/// A message tagged with our own instance id is an echo of something we
/// already forwarded. An absent instance id is treated as remote, so
/// delivery fails open rather than dropping a reachable message.
pub fn accepts_remote(local_instance: &str, instance: Option<&str>, text: &str) -> bool {
    !text.is_empty() && instance != Some(local_instance)
}

/// Hand an accepted chat line to the local instance.
pub async fn deliver(port: &dyn ControlPort, sender: &str, text: &str) -> bool {
    port.command(
        "exec_command",
        &[
            ("name", "chat_receive".to_string()),
            ("sender", sender.to_string()),
            ("text", text.to_string()),
        ],
    )
    .await
}
