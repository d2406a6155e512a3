//! Window-state synchronization primitives for parlor rooms.
//!
//! Pure functions only: extract an id-indexed window map from a control
//! socket snapshot, diff two maps into a minimal delta, and apply a delta
//! to a map. The bridge sidecar composes these with I/O; nothing in this
//! crate touches a socket.

pub mod delta;
pub mod extract;
pub mod types;

pub use delta::{apply, compute};
pub use extract::windows_from_state;
pub use types::{Delta, WindowMap, WindowRecord};
