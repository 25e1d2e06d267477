//! Scoped ownership of background tasks.
//!
//! Every timer and listener task spawned for a session is registered in a
//! [`TaskScope`]. Releasing the scope cancels its token and aborts whatever
//! is still running, so nothing outlives the session that created it.

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct TaskScope {
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for TaskScope {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScope {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Token observed by tasks that need to check for release before acting.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_released(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn `fut` on the current runtime, bound to this scope.
    /// Returns `false` without spawning if the scope was already released
    /// or the caller is outside a Tokio runtime.
    pub fn spawn<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_released() {
            return false;
        }
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "no Tokio runtime; background task not started");
                return false;
            }
        };
        let token = self.token.clone();
        let handle = runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = fut => {}
            }
        });
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        true
    }

    /// Number of tasks that have not finished yet.
    pub fn live_tasks(&self) -> usize {
        let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Cancel and abort every task. Safe to call more than once.
    pub fn release(&self) {
        self.token.cancel();
        let drained: Vec<JoinHandle<()>> = {
            let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            handles.drain(..).collect()
        };
        if !drained.is_empty() {
            debug!(tasks = drained.len(), "releasing task scope");
        }
        for handle in drained {
            handle.abort();
        }
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn release_stops_pending_timers() {
        let scope = TaskScope::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        assert!(scope.spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            f.fetch_add(1, Ordering::SeqCst);
        }));

        scope.release();
        scope.release();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(scope.is_released());
    }

    #[tokio::test]
    async fn spawn_after_release_is_refused() {
        let scope = TaskScope::new();
        scope.release();
        assert!(!scope.spawn(async {}));
        assert_eq!(scope.live_tasks(), 0);
    }

    #[test]
    fn spawn_outside_runtime_is_refused() {
        let scope = TaskScope::new();
        assert!(!scope.spawn(async {}));
        assert_eq!(scope.live_tasks(), 0);
        assert!(!scope.is_released());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_releases_tasks() {
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let scope = TaskScope::new();
            let f = fired.clone();
            scope.spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                f.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
