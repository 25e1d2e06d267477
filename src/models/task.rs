//! Task snapshots as returned by the task API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Authoritative task record. Only the id and unread count matter here;
/// every other field is kept for the views that render the task.
///
/// The id is read from `id`, or from `_id` when `id` is absent. Records
/// carrying both are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawTask")]
pub struct TaskSnapshot {
    pub id: String,
    #[serde(rename = "unreadCount", default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<serde_json::Value>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct RawTask {
    #[serde(default)]
    id: Option<Value>,
    #[serde(rename = "_id", default)]
    underscore_id: Option<Value>,
    #[serde(rename = "unreadCount", default)]
    unread_count: Option<Value>,
    #[serde(flatten)]
    fields: serde_json::Map<String, Value>,
}

impl TryFrom<RawTask> for TaskSnapshot {
    type Error = String;

    fn try_from(raw: RawTask) -> Result<Self, Self::Error> {
        let id = raw
            .id
            .as_ref()
            .and_then(id_string)
            .or_else(|| raw.underscore_id.as_ref().and_then(id_string))
            .ok_or_else(|| "task record has no string or numeric id".to_string())?;
        Ok(Self {
            id,
            unread_count: raw.unread_count,
            fields: raw.fields,
        })
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl TaskSnapshot {
    pub fn new(id: impl Into<String>, unread_count: Option<u32>) -> Self {
        Self {
            id: id.into(),
            unread_count: unread_count.map(serde_json::Value::from),
            fields: serde_json::Map::new(),
        }
    }

    /// The carried unread count, normalized.
    pub fn carried_unread(&self) -> Option<u32> {
        self.unread_count.as_ref().map(normalize_count)
    }
}

/// Clamp any JSON value to a non-negative integer count.
/// Non-numeric, non-finite, and negative inputs become 0.
pub fn normalize_count(value: &serde_json::Value) -> u32 {
    match value.as_f64() {
        Some(n) => normalize_f64(n),
        None => 0,
    }
}

pub fn normalize_f64(n: f64) -> u32 {
    if !n.is_finite() || n <= 0.0 {
        return 0;
    }
    if n >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        n.trunc() as u32
    }
}
