//! Event models for the notification WebSocket.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Raw frame as sent by the notification server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEvent {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Client -> server events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// "Still here" signal; carries no payload.
    PresenceHeartbeat,
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Server -> client events the sync layer understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ConnectionEstablished { socket_id: String },
    TaskAssigned { task_id: String },
    TaskUpdated { task_id: String },
}

pub const EVENT_CONNECTION_ESTABLISHED: &str = "connection_established";
pub const EVENT_TASK_ASSIGNED: &str = "task-assigned";
pub const EVENT_TASK_UPDATED: &str = "task-updated";

impl ServerEvent {
    /// Parse a text frame. Unknown events and malformed payloads yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let frame: WsEvent = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "dropping non-json frame");
                return None;
            }
        };
        Self::from_frame(&frame)
    }

    pub fn from_frame(frame: &WsEvent) -> Option<Self> {
        let event = match frame.event.as_str() {
            EVENT_TASK_ASSIGNED => ServerEvent::TaskAssigned {
                task_id: string_field(&frame.data, "taskId")?,
            },
            EVENT_TASK_UPDATED => ServerEvent::TaskUpdated {
                task_id: string_field(&frame.data, "taskId")?,
            },
            EVENT_CONNECTION_ESTABLISHED => ServerEvent::ConnectionEstablished {
                socket_id: string_field(&frame.data, "socket_id")?,
            },
            other => {
                debug!(event = %other, "ignoring unknown event");
                return None;
            }
        };
        Some(event)
    }

    /// Task id for events that mark a task as having unseen activity.
    pub fn unread_task_id(&self) -> Option<&str> {
        match self {
            ServerEvent::TaskAssigned { task_id } | ServerEvent::TaskUpdated { task_id } => {
                Some(task_id)
            }
            ServerEvent::ConnectionEstablished { .. } => None,
        }
    }
}

fn string_field(data: &serde_json::Value, key: &str) -> Option<String> {
    let value = data.get(key).and_then(|v| v.as_str()).map(str::trim);
    match value {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => {
            debug!(field = %key, "dropping event with missing or empty field");
            None
        }
    }
}
