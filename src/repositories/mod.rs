//! Data access: the task REST API the sync layer reads snapshots from and
//! acknowledges reads against.

pub mod task_api;

pub use task_api::{HttpTaskApi, TaskApi};
