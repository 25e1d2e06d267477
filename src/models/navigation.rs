//! Navigation intent carrying an optional highlight target.

/// Query keys that name a task to highlight, in priority order.
const TARGET_KEYS: [&str; 2] = ["highlight", "taskId"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationIntent {
    pub target_task: Option<String>,
}

impl NavigationIntent {
    pub fn to_task(task_id: impl Into<String>) -> Self {
        Self {
            target_task: Some(task_id.into()),
        }
    }

    /// Extract the target from a query string (`?highlight=t-1&page=2`).
    pub fn from_query(query: &str) -> Self {
        let query = query.trim_start_matches('?');
        let pairs: Vec<(&str, &str)> = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .collect();
        let target_task = TARGET_KEYS.iter().find_map(|key| {
            pairs
                .iter()
                .find(|(k, v)| k == key && !v.is_empty())
                .map(|(_, v)| v.to_string())
        });
        Self { target_task }
    }
}
