//! Data models for wire events, task snapshots, presence signals, and navigation intent.

pub mod event;
pub mod navigation;
pub mod presence;
pub mod task;

pub use event::*;
pub use navigation::*;
pub use presence::*;
pub use task::*;
