//! HTTP client for task snapshots and read acknowledgment.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::SyncResult;
use crate::models::task::TaskSnapshot;

const TASKS_PATH: &str = "/api/tasks";

/// Task API used by the notification engine.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Fetch the authoritative task list.
    async fn fetch_tasks(&self) -> SyncResult<Vec<TaskSnapshot>>;

    /// Tell the server the user has seen `task_id`.
    async fn acknowledge(&self, task_id: &str) -> SyncResult<()>;
}

/// The list endpoint answers either a bare array or `{ "tasks": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum TaskListBody {
    Bare(Vec<TaskSnapshot>),
    Wrapped { tasks: Vec<TaskSnapshot> },
}

impl TaskListBody {
    fn into_tasks(self) -> Vec<TaskSnapshot> {
        match self {
            TaskListBody::Bare(tasks) | TaskListBody::Wrapped { tasks } => tasks,
        }
    }
}

/// reqwest-backed [`TaskApi`] authenticated with a bearer token.
#[derive(Clone)]
pub struct HttpTaskApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTaskApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn tasks_url(&self) -> String {
        format!("{}{}", self.base_url, TASKS_PATH)
    }

    fn read_url(&self, task_id: &str) -> String {
        format!("{}{}/{}/read", self.base_url, TASKS_PATH, encode_segment(task_id))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    #[instrument(skip(self))]
    async fn fetch_tasks(&self) -> SyncResult<Vec<TaskSnapshot>> {
        let response = self
            .authorize(self.client.get(self.tasks_url()))
            .send()
            .await?
            .error_for_status()?;
        let tasks = response.json::<TaskListBody>().await?.into_tasks();
        debug!(count = tasks.len(), "fetched task snapshots");
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn acknowledge(&self, task_id: &str) -> SyncResult<()> {
        self.authorize(self.client.post(self.read_url(task_id)))
            .send()
            .await?
            .error_for_status()?;
        debug!(task_id = %task_id, "read acknowledged");
        Ok(())
    }
}

/// Percent-encode a path segment (unreserved characters pass through).
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_endpoint_urls() {
        let api = HttpTaskApi::new("http://localhost:3000/", None);
        assert_eq!(api.tasks_url(), "http://localhost:3000/api/tasks");
        assert_eq!(api.read_url("t-1"), "http://localhost:3000/api/tasks/t-1/read");
    }

    #[test]
    fn encodes_unsafe_task_ids() {
        assert_eq!(encode_segment("a/b c"), "a%2Fb%20c");
        assert_eq!(encode_segment("65f1e0"), "65f1e0");
    }

    #[test]
    fn accepts_both_list_shapes() {
        let bare: TaskListBody = serde_json::from_str(r#"[{"id":"a","unreadCount":1}]"#).unwrap();
        assert_eq!(bare.into_tasks().len(), 1);
        let wrapped: TaskListBody =
            serde_json::from_str(r#"{"tasks":[{"id":"a"},{"_id":"b"}]}"#).unwrap();
        let tasks = wrapped.into_tasks();
        assert_eq!(tasks[1].id, "b");
    }
}
