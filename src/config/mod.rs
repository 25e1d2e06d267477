//! Client configuration loaded from environment.

use std::time::Duration;

use crate::connection::ConnectionSettings;
use crate::services::presence::HeartbeatPolicy;

/// Client configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Notification server origin (e.g. `https://notify.example.com`).
    pub server_origin: String,
    /// WebSocket path on the notification server.
    pub ws_path: String,
    /// Base URL of the task REST API. Defaults to the server origin.
    pub api_base_url: String,
    /// Opaque bearer credential attached to the handshake and REST calls.
    pub auth_token: Option<String>,
    /// Periodic forced heartbeat interval.
    pub heartbeat_interval: Duration,
    /// Activity older than this blocks non-forced heartbeats.
    pub heartbeat_idle_timeout: Duration,
    /// Minimum gap between two non-forced heartbeats.
    pub heartbeat_min_gap: Duration,
    /// How long a located highlight stays active.
    pub highlight_dwell: Duration,
    /// Snapshot refresh period; `None` disables periodic seeding.
    pub snapshot_refresh: Option<Duration>,
    /// First reconnect delay; doubles per failed attempt.
    pub reconnect_delay: Duration,
    /// Upper bound for the reconnect delay.
    pub max_reconnect_delay: Duration,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_origin: "http://127.0.0.1:3000".to_string(),
            ws_path: "/ws".to_string(),
            api_base_url: "http://127.0.0.1:3000".to_string(),
            auth_token: None,
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_idle_timeout: Duration::from_secs(120),
            heartbeat_min_gap: Duration::from_secs(15),
            highlight_dwell: Duration::from_millis(2600),
            snapshot_refresh: Some(Duration::from_secs(30)),
            reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(10),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (environment, test map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server_origin = lookup("NOTIF_SERVER_ORIGIN")
            .unwrap_or(defaults.server_origin)
            .trim_end_matches('/')
            .to_string();
        if !has_known_scheme(&server_origin) {
            return Err(ConfigLoadError::InvalidServerOrigin(server_origin));
        }

        let ws_path = lookup("NOTIF_WS_PATH").unwrap_or(defaults.ws_path);
        let api_base_url = lookup("API_BASE_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| server_origin.clone());
        let auth_token = lookup("NOTIF_TOKEN").filter(|t| !t.trim().is_empty());

        let heartbeat_interval =
            Duration::from_secs(parse_u64(&lookup, "HEARTBEAT_INTERVAL_SECS", 60)?);
        let heartbeat_idle_timeout =
            Duration::from_secs(parse_u64(&lookup, "HEARTBEAT_IDLE_TIMEOUT_SECS", 120)?);
        let heartbeat_min_gap =
            Duration::from_secs(parse_u64(&lookup, "HEARTBEAT_MIN_GAP_SECS", 15)?);
        if heartbeat_interval.is_zero() {
            return Err(ConfigLoadError::InvalidNumber("HEARTBEAT_INTERVAL_SECS"));
        }
        let highlight_dwell = Duration::from_millis(parse_u64(&lookup, "HIGHLIGHT_DWELL_MS", 2600)?);
        let snapshot_refresh = match parse_u64(&lookup, "SNAPSHOT_REFRESH_SECS", 30)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let reconnect_delay = Duration::from_millis(parse_u64(&lookup, "RECONNECT_DELAY_MS", 500)?);
        let max_reconnect_delay =
            Duration::from_millis(parse_u64(&lookup, "MAX_RECONNECT_DELAY_MS", 10_000)?);
        let log_level = lookup("LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            server_origin,
            ws_path,
            api_base_url,
            auth_token,
            heartbeat_interval,
            heartbeat_idle_timeout,
            heartbeat_min_gap,
            highlight_dwell,
            snapshot_refresh,
            reconnect_delay,
            max_reconnect_delay: max_reconnect_delay.max(reconnect_delay),
            log_level,
        })
    }

    /// Transport settings for the notification connection.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            ws_url: ws_url(&self.server_origin, &self.ws_path),
            reconnect_delay: self.reconnect_delay,
            max_reconnect_delay: self.max_reconnect_delay,
        }
    }

    pub fn heartbeat_policy(&self) -> HeartbeatPolicy {
        HeartbeatPolicy {
            interval: self.heartbeat_interval,
            idle_timeout: self.heartbeat_idle_timeout,
            min_gap: self.heartbeat_min_gap,
        }
    }
}

fn has_known_scheme(origin: &str) -> bool {
    ["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|scheme| origin.starts_with(scheme) && origin.len() > scheme.len())
}

fn parse_u64<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigLoadError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigLoadError::InvalidNumber(key)),
        None => Ok(default),
    }
}

/// Derive the WebSocket URL from a server origin (`https://host` -> `wss://host/ws`).
pub fn ws_url(origin: &str, path: &str) -> String {
    let origin = origin.trim_end_matches('/');
    let base = if let Some(rest) = origin.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = origin.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        origin.to_string()
    };
    if path.is_empty() {
        base
    } else if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid NOTIF_SERVER_ORIGIN: {0}")]
    InvalidServerOrigin(String),
    #[error("Invalid number in {0}")]
    InvalidNumber(&'static str),
}
