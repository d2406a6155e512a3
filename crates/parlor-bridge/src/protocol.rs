//! Wire types for the relay room and the control-socket push stream.
//!
//! Everything is decoded at the boundary into these tagged enums;
//! undecodable frames are dropped where they are read.

use parlor_sync::Delta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages exchanged with a relay room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayMessage {
    /// Full canonical window map for the room. Inbound only.
    #[serde(rename = "state_sync")]
    StateSync { state: RemoteState },

    /// Incremental change pushed by one instance.
    #[serde(rename = "state_delta")]
    StateDelta { delta: Delta },

    /// One chat line relayed between instances.
    #[serde(rename = "chat_msg")]
    ChatMsg {
        #[serde(default)]
        sender: String,
        #[serde(default)]
        text: String,
        /// Originating instance id. Absent on messages from senders that
        /// predate echo suppression; treated as remote.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instance: Option<String>,
    },
}

/// Payload of a `state_sync`. The `windows` value may be an id-keyed map
/// or a list; it goes through the extractor before any diffing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteState {
    #[serde(default)]
    pub windows: Value,
}

/// Push frames on a control-socket connection after `subscribe_events`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum IpcPush {
    /// Acknowledgement that the subscription is live.
    #[serde(rename = "subscribed")]
    Subscribed,

    /// A state notification (`state_changed`, `window_closed`, ...).
    #[serde(rename = "event")]
    Event { event: String },
}

/// Server side of the control-socket auth handshake.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum AuthServerMessage {
    #[serde(rename = "challenge")]
    Challenge { nonce: String },

    #[serde(rename = "auth_ok")]
    AuthOk,
}

/// Client reply to an auth challenge.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum AuthClientMessage {
    #[serde(rename = "auth")]
    Auth { hmac: String },
}

/// Build the room WebSocket URL from the relay's base URL.
///
/// Accepts an `http(s)://` base (converted to `ws(s)://`) or an already
/// WebSocket-schemed one; a bare host gets `ws://`.
pub fn build_ws_url(relay_url: &str, room: &str) -> String {
    let base = relay_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("wss://") || base.starts_with("ws://") {
        base.to_string()
    } else {
        format!("ws://{base}")
    };
    format!("{ws_base}/party/{room}")
}
