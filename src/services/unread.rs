//! Per-task unread counts reconciled from push events and fetched snapshots.
//!
//! Two tiers: pushed overrides are consulted first, seeded values second,
//! then whatever the task record itself carries. A late snapshot therefore
//! never erases a more recent push; only `clear` drops an override.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, instrument, warn};

use crate::connection::Connection;
use crate::error::SyncResult;
use crate::models::event::ServerEvent;
use crate::models::task::TaskSnapshot;
use crate::repositories::TaskApi;
use crate::scope::TaskScope;

/// The two-tier unread map.
#[derive(Debug, Default, Clone)]
pub struct UnreadCounts {
    overrides: HashMap<String, u32>,
    seeded: HashMap<String, u32>,
}

impl UnreadCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install snapshot values. Ids with a pushed override keep it.
    pub fn seed(&mut self, tasks: &[TaskSnapshot]) {
        for task in tasks {
            let count = task.carried_unread().unwrap_or(0);
            self.seeded.insert(task.id.clone(), count);
        }
    }

    /// Mark unseen activity. Repeated delivery leaves the value at 1.
    pub fn assign(&mut self, task_id: &str) {
        self.overrides.insert(task_id.to_string(), 1);
    }

    pub fn clear(&mut self, task_id: &str) {
        self.overrides.remove(task_id);
        self.seeded.insert(task_id.to_string(), 0);
    }

    pub fn has_override(&self, task_id: &str) -> bool {
        self.overrides.contains_key(task_id)
    }

    fn local(&self, task_id: &str) -> Option<u32> {
        self.overrides
            .get(task_id)
            .or_else(|| self.seeded.get(task_id))
            .copied()
    }

    /// Count for a rendered task: local map first, then its own field, else 0.
    pub fn lookup(&self, task: &TaskSnapshot) -> u32 {
        self.local(&task.id)
            .or_else(|| task.carried_unread())
            .unwrap_or(0)
    }

    pub fn get(&self, task_id: &str) -> u32 {
        self.local(task_id).unwrap_or(0)
    }

    /// Sum across every known task, for a global badge.
    pub fn total(&self) -> u64 {
        let mut ids: Vec<&String> = self.overrides.keys().collect();
        ids.extend(self.seeded.keys().filter(|id| !self.overrides.contains_key(*id)));
        ids.into_iter().map(|id| u64::from(self.get(id))).sum()
    }
}

/// Shared unread state plus the tasks that keep it current.
pub struct NotificationEngine {
    counts: Arc<RwLock<UnreadCounts>>,
    api: Arc<dyn TaskApi>,
    scope: TaskScope,
}

impl NotificationEngine {
    pub fn new(api: Arc<dyn TaskApi>) -> Self {
        Self {
            counts: Arc::new(RwLock::new(UnreadCounts::new())),
            api,
            scope: TaskScope::new(),
        }
    }

    pub fn seed(&self, tasks: &[TaskSnapshot]) {
        write(&self.counts).seed(tasks);
        debug!(count = tasks.len(), "seeded unread counts");
    }

    pub fn on_task_assigned(&self, task_id: &str) {
        write(&self.counts).assign(task_id);
        debug!(task_id = %task_id, "task marked unread");
    }

    /// Zero the count locally, then acknowledge. An acknowledgment failure
    /// is logged; the local zero stands until the next seed.
    #[instrument(skip(self))]
    pub async fn clear(&self, task_id: &str) {
        write(&self.counts).clear(task_id);
        if let Err(e) = self.api.acknowledge(task_id).await {
            warn!(task_id = %task_id, error = %e, "read acknowledgment failed");
        }
    }

    pub fn lookup(&self, task: &TaskSnapshot) -> u32 {
        read(&self.counts).lookup(task)
    }

    pub fn unread(&self, task_id: &str) -> u32 {
        read(&self.counts).get(task_id)
    }

    pub fn total_unread(&self) -> u64 {
        read(&self.counts).total()
    }

    pub fn snapshot(&self) -> UnreadCounts {
        read(&self.counts).clone()
    }

    /// Fetch snapshots and seed them. Returns the number of tasks seen.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> SyncResult<usize> {
        let tasks = self.api.fetch_tasks().await?;
        self.seed(&tasks);
        Ok(tasks.len())
    }

    /// Apply push events from the connection for as long as the engine lives.
    pub fn attach(&self, connection: &Connection) -> bool {
        self.attach_events(connection.subscribe())
    }

    pub fn attach_events(&self, mut events: broadcast::Receiver<ServerEvent>) -> bool {
        let counts = self.counts.clone();
        self.scope.spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Some(task_id) = event.unread_task_id() {
                            write(&counts).assign(task_id);
                            debug!(task_id = %task_id, "push marked task unread");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "push events lagged; next seed will reconcile");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Re-seed every `period`. The first refresh runs one period from now.
    pub fn spawn_refresh(&self, period: Duration) -> bool {
        let counts = self.counts.clone();
        let api = self.api.clone();
        self.scope.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match api.fetch_tasks().await {
                    Ok(tasks) => {
                        write(&counts).seed(&tasks);
                        debug!(count = tasks.len(), "periodic seed");
                    }
                    Err(e) => warn!(error = %e, "periodic task fetch failed"),
                }
            }
        })
    }

    pub fn teardown(&self) {
        if !self.scope.is_released() {
            info!("notification engine stopped");
        }
        self.scope.release();
    }
}

fn read(counts: &RwLock<UnreadCounts>) -> std::sync::RwLockReadGuard<'_, UnreadCounts> {
    counts.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(counts: &RwLock<UnreadCounts>) -> std::sync::RwLockWriteGuard<'_, UnreadCounts> {
    counts.write().unwrap_or_else(PoisonError::into_inner)
}
