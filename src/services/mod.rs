//! Sync services: presence heartbeat, unread reconciliation, and highlight navigation.

pub mod highlight;
pub mod presence;
pub mod unread;

pub use highlight::{HighlightHost, HighlightMachine, HighlightState, Highlighter};
pub use presence::{HeartbeatHandle, HeartbeatPolicy, HeartbeatScheduler};
pub use unread::{NotificationEngine, UnreadCounts};
