//! Presence heartbeat: tell the server this session is alive without
//! flooding it.
//!
//! Activity triggers a throttled heartbeat; regaining visibility and the
//! periodic tick force one. Nothing is ever sent while the page is hidden
//! or the connection is down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, trace};
use uuid::Uuid;

use crate::connection::Transport;
use crate::models::event::ClientEvent;
use crate::models::presence::{ActivityKind, PresenceSignal, Visibility};
use crate::scope::TaskScope;

/// Timing policy for heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    /// Forced heartbeat period.
    pub interval: Duration,
    /// Non-forced attempts are refused once activity is older than this.
    pub idle_timeout: Duration,
    /// Non-forced attempts are refused within this gap of the last heartbeat.
    pub min_gap: Duration,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(120),
            min_gap: Duration::from_secs(15),
        }
    }
}

/// Why a heartbeat attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    Hidden,
    Disconnected,
    Idle,
    Throttled,
}

/// Per-session presence bookkeeping.
#[derive(Debug, Clone)]
pub struct PresenceState {
    pub last_activity_at: Instant,
    pub last_heartbeat_at: Option<Instant>,
    pub visibility: Visibility,
}

impl PresenceState {
    pub fn new(now: Instant, visibility: Visibility) -> Self {
        Self {
            last_activity_at: now,
            last_heartbeat_at: None,
            visibility,
        }
    }

    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity_at = now;
    }

    /// Emission gate. Forced attempts skip the idle and throttle checks only.
    pub fn gate(
        &self,
        policy: &HeartbeatPolicy,
        now: Instant,
        forced: bool,
        connected: bool,
    ) -> Result<(), Refusal> {
        if !self.visibility.is_visible() {
            return Err(Refusal::Hidden);
        }
        if !connected {
            return Err(Refusal::Disconnected);
        }
        if forced {
            return Ok(());
        }
        if now.saturating_duration_since(self.last_activity_at) > policy.idle_timeout {
            return Err(Refusal::Idle);
        }
        match self.last_heartbeat_at {
            Some(last) if now.saturating_duration_since(last) < policy.min_gap => {
                Err(Refusal::Throttled)
            }
            _ => Ok(()),
        }
    }

    pub fn mark_emitted(&mut self, now: Instant) {
        self.last_heartbeat_at = Some(now);
    }
}

/// Handle to a running heartbeat session. Dropping it tears the session down.
pub struct HeartbeatHandle {
    session_id: Uuid,
    signals: mpsc::UnboundedSender<PresenceSignal>,
    scope: TaskScope,
}

impl HeartbeatHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn activity(&self, kind: ActivityKind) {
        let _ = self.signals.send(PresenceSignal::Activity(kind));
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        let _ = self.signals.send(PresenceSignal::Visibility(visibility));
    }

    pub fn is_active(&self) -> bool {
        !self.scope.is_released()
    }

    /// Stop the tick and the signal listener. Idempotent.
    pub fn teardown(&self) {
        if self.is_active() {
            info!(session = %self.session_id, "presence heartbeat stopped");
        }
        self.scope.release();
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

pub struct HeartbeatScheduler;

impl HeartbeatScheduler {
    /// Start a heartbeat session over `transport`. The first periodic tick
    /// fires one interval after start.
    pub fn start(
        transport: Arc<dyn Transport>,
        policy: HeartbeatPolicy,
        visibility: Visibility,
    ) -> HeartbeatHandle {
        let session_id = Uuid::new_v4();
        let (signals, rx) = mpsc::unbounded_channel();
        let scope = TaskScope::new();
        let token = scope.token();

        let worker = HeartbeatWorker {
            session_id,
            transport,
            policy,
            state: PresenceState::new(Instant::now(), visibility),
            token,
        };
        scope.spawn(worker.run(rx));
        info!(session = %session_id, ?visibility, "presence heartbeat started");

        HeartbeatHandle {
            session_id,
            signals,
            scope,
        }
    }
}

struct HeartbeatWorker {
    session_id: Uuid,
    transport: Arc<dyn Transport>,
    policy: HeartbeatPolicy,
    state: PresenceState,
    token: tokio_util::sync::CancellationToken,
}

impl HeartbeatWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PresenceSignal>) {
        let period = self.policy.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let token = self.token.clone();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.attempt(true, "tick");
                }
                signal = rx.recv() => match signal {
                    Some(PresenceSignal::Activity(kind)) => self.on_activity(kind),
                    Some(PresenceSignal::Visibility(visibility)) => self.on_visibility(visibility),
                    None => break,
                },
            }
        }
    }

    fn on_activity(&mut self, kind: ActivityKind) {
        trace!(session = %self.session_id, ?kind, "activity");
        self.state.record_activity(Instant::now());
        self.attempt(false, "activity");
    }

    fn on_visibility(&mut self, visibility: Visibility) {
        let regained = !self.state.visibility.is_visible() && visibility.is_visible();
        self.state.visibility = visibility;
        if regained {
            self.state.record_activity(Instant::now());
            self.attempt(true, "visible");
        }
    }

    #[instrument(skip(self), fields(session = %self.session_id))]
    fn attempt(&mut self, forced: bool, reason: &'static str) -> bool {
        let now = Instant::now();
        if let Err(refusal) =
            self.state
                .gate(&self.policy, now, forced, self.transport.is_connected())
        {
            debug!(?refusal, "heartbeat refused");
            return false;
        }
        if self.token.is_cancelled() {
            return false;
        }
        match self.transport.emit(ClientEvent::PresenceHeartbeat) {
            Ok(()) => {
                self.state.mark_emitted(now);
                debug!("heartbeat sent");
                true
            }
            Err(e) => {
                debug!(error = %e, "heartbeat not sent");
                false
            }
        }
    }
}
