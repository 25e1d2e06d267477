//! Notification connection: one authenticated WebSocket per process.
//!
//! A background task owns the socket. It reads server frames and fans them
//! out to subscribers, writes queued client events, and reconnects with
//! exponential backoff whenever the socket drops. Callers never see
//! transport errors; they see `is_connected() == false` until the next
//! successful handshake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::models::event::{ClientEvent, ServerEvent};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const EVENT_CHANNEL_CAPACITY: usize = 256;

static CONNECTION: OnceLock<Connection> = OnceLock::new();

/// Return the process-wide connection, creating it on first call.
/// Later calls ignore `config`.
pub fn acquire_connection(config: &Config) -> &'static Connection {
    CONNECTION.get_or_init(|| Connection::new(config.connection_settings()))
}

/// Where to connect and how to back off.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub ws_url: String,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl ConnectionSettings {
    /// Delay before reconnect attempt `attempt` (0-based), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.reconnect_delay
            .saturating_mul(factor)
            .min(self.max_reconnect_delay)
    }
}

/// Read side of the connection used by presence and notification services.
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;
    fn emit(&self, event: ClientEvent) -> SyncResult<()>;
}

enum ConnCmd {
    Emit(ClientEvent),
    Reauthenticate,
}

enum SessionEnd {
    Dropped,
    Reauthenticate,
    Shutdown,
}

/// Cloneable handle to the notification connection.
///
/// The background task stops once every handle is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
    commands: Arc<OnceLock<mpsc::UnboundedSender<ConnCmd>>>,
}

struct Inner {
    settings: ConnectionSettings,
    credential: RwLock<Option<String>>,
    connected: AtomicBool,
    events: broadcast::Sender<ServerEvent>,
}

impl Inner {
    fn credential(&self) -> Option<String> {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Connection {
    /// Isolated handle. Most callers want [`acquire_connection`].
    pub fn new(settings: ConnectionSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                settings,
                credential: RwLock::new(None),
                connected: AtomicBool::new(false),
                events,
            }),
            commands: Arc::new(OnceLock::new()),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.inner.settings
    }

    /// Attach `token` and open the connection if it is not open yet.
    ///
    /// Same token again: no-op. New token: the live socket is closed and the
    /// handshake is repeated with the new credential. Must be called from
    /// within a Tokio runtime.
    pub fn connect_authenticated(&self, token: impl Into<String>) {
        let token = token.into();
        let changed = {
            let mut credential = self
                .inner
                .credential
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let changed = credential.as_deref() != Some(token.as_str());
            *credential = Some(token);
            changed
        };

        if let Some(tx) = self.commands.get() {
            if changed {
                info!(url = %self.inner.settings.ws_url, "credential changed, reauthenticating");
                if tx.send(ConnCmd::Reauthenticate).is_err() {
                    warn!(
                        url = %self.inner.settings.ws_url,
                        "connection task has stopped; new credential not applied"
                    );
                }
            } else {
                debug!("connect requested with current credential, nothing to do");
            }
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if self.commands.set(tx).is_err() {
            // Another caller started the task between `get` and `set`.
            return;
        }
        tokio::spawn(connection_task(self.inner.clone(), rx));
    }

    /// Register a push handler. Events arrive in transport order.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }

    pub fn has_credential(&self) -> bool {
        self.inner.credential().is_some()
    }
}

impl Transport for Connection {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn emit(&self, event: ClientEvent) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let tx = self.commands.get().ok_or(SyncError::NotConnected)?;
        tx.send(ConnCmd::Emit(event))
            .map_err(|_| SyncError::NotConnected)
    }
}

async fn establish(url: &str, token: Option<&str>) -> SyncResult<WsStream> {
    let mut request = url.into_client_request()?;
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| SyncError::InvalidHeader(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

async fn connection_task(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<ConnCmd>) {
    let url = inner.settings.ws_url.clone();
    let mut attempt: u32 = 0;

    loop {
        let token = inner.credential();
        match establish(&url, token.as_deref()).await {
            Ok(stream) => {
                attempt = 0;
                inner.connected.store(true, Ordering::SeqCst);
                info!(url = %url, "notification connection open");
                let end = run_session(&inner, stream, &mut rx).await;
                inner.connected.store(false, Ordering::SeqCst);
                match end {
                    SessionEnd::Reauthenticate => continue,
                    SessionEnd::Shutdown => {
                        info!(url = %url, "notification connection closed");
                        return;
                    }
                    SessionEnd::Dropped => warn!(url = %url, "notification connection dropped"),
                }
            }
            Err(e) => {
                warn!(url = %url, attempt = attempt + 1, error = %e, "notification connect failed");
            }
        }

        let delay = inner.settings.backoff(attempt);
        attempt = attempt.saturating_add(1);
        debug!(delay_ms = delay.as_millis() as u64, attempt, "reconnecting after delay");

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = rx.recv() => match cmd {
                    Some(ConnCmd::Reauthenticate) => {
                        attempt = 0;
                        break;
                    }
                    Some(ConnCmd::Emit(event)) => {
                        debug!(?event, "dropping client event while disconnected");
                    }
                    None => return,
                },
            }
        }
    }
}

async fn run_session(
    inner: &Inner,
    stream: WsStream,
    rx: &mut mpsc::UnboundedReceiver<ConnCmd>,
) -> SessionEnd {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = ServerEvent::parse(text.as_str()) {
                        debug!(?event, "push event");
                        // No subscribers is fine; events are fire-and-forget.
                        let _ = inner.events.send(event);
                    }
                }
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "notification socket error");
                    return SessionEnd::Dropped;
                }
            },
            cmd = rx.recv() => match cmd {
                Some(ConnCmd::Emit(event)) => {
                    let payload = match event.to_json() {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(error = %e, "failed to encode client event");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(payload.into())).await {
                        warn!(error = %e, "failed to send client event");
                        return SessionEnd::Dropped;
                    }
                }
                Some(ConnCmd::Reauthenticate) => {
                    let _ = sink.close().await;
                    return SessionEnd::Reauthenticate;
                }
                None => {
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            ws_url: "ws://127.0.0.1:9/ws".to_string(),
            reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(10),
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let s = settings();
        assert_eq!(s.backoff(0), Duration::from_millis(500));
        assert_eq!(s.backoff(1), Duration::from_secs(1));
        assert_eq!(s.backoff(3), Duration::from_secs(4));
        assert_eq!(s.backoff(5), Duration::from_secs(10));
        assert_eq!(s.backoff(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn new_connection_is_closed() {
        let conn = Connection::new(settings());
        assert!(!conn.is_connected());
        assert!(!conn.has_credential());
        assert!(matches!(
            conn.emit(ClientEvent::PresenceHeartbeat),
            Err(SyncError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn repeated_connect_keeps_one_task() {
        let conn = Connection::new(settings());
        conn.connect_authenticated("tok");
        conn.connect_authenticated("tok");
        conn.clone().connect_authenticated("tok");
        assert!(conn.has_credential());
        assert!(conn.commands.get().is_some());
        assert!(!conn.is_connected());
    }

    #[test]
    fn credential_change_after_task_stopped_is_kept() {
        let conn = Connection::new(settings());
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async { conn.connect_authenticated("old") });
        drop(rt);

        conn.connect_authenticated("new");
        assert_eq!(conn.inner.credential().as_deref(), Some("new"));
        assert!(conn.commands.get().unwrap().is_closed());
    }

    #[test]
    fn acquire_returns_the_same_handle() {
        let config = Config::default();
        let a = acquire_connection(&config);
        let b = acquire_connection(&Config {
            server_origin: "http://other:1".to_string(),
            ..Config::default()
        });
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
        assert_eq!(b.settings().ws_url, "ws://127.0.0.1:3000/ws");
    }
}
