//! Real-time presence and task-notification sync client.
//!
//! Keeps one authenticated WebSocket to the notification server, sends
//! activity-gated presence heartbeats, reconciles pushed "task assigned"
//! events with fetched task snapshots into per-task unread counts, and
//! drives locate-and-highlight navigation for a task named by a
//! notification click.

pub mod config;
pub mod connection;
pub mod error;
pub mod models;
pub mod repositories;
pub mod scope;
pub mod services;

pub use config::Config;
pub use connection::{acquire_connection, Connection, Transport};
pub use error::{SyncError, SyncResult};
pub use services::highlight::Highlighter;
pub use services::presence::{HeartbeatHandle, HeartbeatScheduler};
pub use services::unread::NotificationEngine;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use models::presence::Visibility;
use repositories::HttpTaskApi;

/// Wired client: the shared connection plus the services built on it.
pub struct SyncClient {
    pub config: Config,
    pub connection: &'static Connection,
    pub engine: NotificationEngine,
    wired: AtomicBool,
}

impl SyncClient {
    /// Open the connection with the configured token and start applying
    /// push events. Returns `false` if no token is configured.
    ///
    /// Safe to call repeatedly: the push pump and refresh loop are started
    /// on the first successful call only.
    pub fn connect(&self) -> bool {
        let Some(token) = self.config.auth_token.clone() else {
            tracing::warn!("no NOTIF_TOKEN configured; staying offline");
            return false;
        };
        self.connection.connect_authenticated(token);
        if self.wired.swap(true, Ordering::SeqCst) {
            tracing::debug!("client already wired to the connection");
            return true;
        }
        self.engine.attach(self.connection);
        if let Some(period) = self.config.snapshot_refresh {
            self.engine.spawn_refresh(period);
        }
        true
    }

    /// Start a presence heartbeat session for the current page.
    pub fn start_heartbeat(&self, visibility: Visibility) -> HeartbeatHandle {
        HeartbeatScheduler::start(
            Arc::new(self.connection.clone()),
            self.config.heartbeat_policy(),
            visibility,
        )
    }

    /// A highlighter for one list view.
    pub fn highlighter(&self) -> Highlighter {
        Highlighter::new(self.config.highlight_dwell)
    }

    pub fn shutdown(&self) {
        self.engine.teardown();
    }
}

/// Build the client from configuration. Used by main and by integration tests.
pub fn create_client(config: Config) -> SyncClient {
    let connection = acquire_connection(&config);
    let api = HttpTaskApi::new(config.api_base_url.clone(), config.auth_token.clone());
    let engine = NotificationEngine::new(Arc::new(api));
    SyncClient {
        config,
        connection,
        engine,
        wired: AtomicBool::new(false),
    }
}
