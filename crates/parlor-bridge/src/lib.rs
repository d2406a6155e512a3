//! Room-sync sidecar for a parlor terminal instance.
//!
//! Runs alongside one parlor process, polling its control socket for
//! window-state snapshots, diffing them, and pushing deltas to a
//! WebSocket relay room. Remote deltas arriving from the room are turned
//! back into control-socket commands, and chat lines are forwarded in
//! both directions. The relay never inspects window contents; it only
//! fans messages out to the other instances in the room.

pub mod apply;
pub mod chat;
pub mod cli;
pub mod ipc;
pub mod protocol;
pub mod session;
