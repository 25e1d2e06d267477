//! Locate-and-highlight for a task named by navigation intent.
//!
//! The machine arms on a target id, clears the view filters that could hide
//! it, drives pagination to the page holding it, asks the view to scroll it
//! into view, and keeps it highlighted for a fixed dwell. A target that is
//! not in the filtered set stays armed; that is a resting state, not an error.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::models::navigation::NavigationIntent;
use crate::scope::TaskScope;

pub const HIGHLIGHT_DWELL: Duration = Duration::from_millis(2600);

/// The list view that owns the highlight target.
pub trait HighlightHost {
    /// Force list mode and drop the narrowing status filter. Search text stays.
    fn reveal_all(&mut self);
    /// Ids in the current filtered order, across all pages.
    fn filtered_ids(&self) -> Vec<String>;
    /// Rows per page; 0 means the list is not paginated.
    fn page_size(&self) -> usize;
    /// 1-based current page.
    fn current_page(&self) -> usize;
    fn go_to_page(&mut self, page: usize);
    /// Scroll the task's row into view. `false` if the row is not rendered.
    fn scroll_into_view(&mut self, task_id: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HighlightState {
    Idle,
    Armed { target: String },
    /// Armed, but the target is not in the filtered set.
    Unreachable { target: String },
    Located { target: String, expires_at: Instant },
}

impl HighlightState {
    pub fn target(&self) -> Option<&str> {
        match self {
            HighlightState::Idle => None,
            HighlightState::Armed { target }
            | HighlightState::Unreachable { target }
            | HighlightState::Located { target, .. } => Some(target),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HighlightMachine {
    state: HighlightState,
    dwell: Duration,
}

impl Default for HighlightMachine {
    fn default() -> Self {
        Self::new(HIGHLIGHT_DWELL)
    }
}

impl HighlightMachine {
    pub fn new(dwell: Duration) -> Self {
        Self {
            state: HighlightState::Idle,
            dwell,
        }
    }

    pub fn state(&self) -> &HighlightState {
        &self.state
    }

    /// Arm on `task_id`, replacing any previous target.
    pub fn arm<H: HighlightHost + ?Sized>(
        &mut self,
        task_id: &str,
        host: &mut H,
        now: Instant,
    ) -> &HighlightState {
        debug!(task_id = %task_id, "highlight armed");
        self.state = HighlightState::Armed {
            target: task_id.to_string(),
        };
        host.reveal_all();
        self.evaluate(host, now)
    }

    /// Re-check the target against the view. Call after any change to the
    /// filtered set, the page, or the rendered rows.
    pub fn evaluate<H: HighlightHost + ?Sized>(
        &mut self,
        host: &mut H,
        now: Instant,
    ) -> &HighlightState {
        let target = match &self.state {
            HighlightState::Armed { target } | HighlightState::Unreachable { target } => {
                target.clone()
            }
            HighlightState::Idle | HighlightState::Located { .. } => return &self.state,
        };

        let Some(index) = host.filtered_ids().iter().position(|id| *id == target) else {
            if !matches!(self.state, HighlightState::Unreachable { .. }) {
                debug!(task_id = %target, "highlight target not in filtered set");
            }
            self.state = HighlightState::Unreachable { target };
            return &self.state;
        };

        let page_size = host.page_size();
        if page_size > 0 {
            let page = index / page_size + 1;
            if host.current_page() != page {
                debug!(task_id = %target, page, "paging to highlight target");
                host.go_to_page(page);
            }
        }

        self.state = if host.scroll_into_view(&target) {
            HighlightState::Located {
                target,
                expires_at: now + self.dwell,
            }
        } else {
            HighlightState::Armed { target }
        };
        &self.state
    }

    /// Clear a located highlight whose dwell has passed.
    pub fn expire(&mut self, now: Instant) -> bool {
        match &self.state {
            HighlightState::Located { expires_at, .. } if now >= *expires_at => {
                self.state = HighlightState::Idle;
                true
            }
            _ => false,
        }
    }

    pub fn is_highlighted(&self, task_id: &str) -> bool {
        matches!(&self.state, HighlightState::Located { target, .. } if target == task_id)
    }

    pub fn reset(&mut self) {
        self.state = HighlightState::Idle;
    }
}

/// A view's highlight machine plus its expiry timers.
pub struct Highlighter {
    machine: Arc<Mutex<HighlightMachine>>,
    scope: TaskScope,
}

impl Default for Highlighter {
    fn default() -> Self {
        Self::new(HIGHLIGHT_DWELL)
    }
}

impl Highlighter {
    pub fn new(dwell: Duration) -> Self {
        Self {
            machine: Arc::new(Mutex::new(HighlightMachine::new(dwell))),
            scope: TaskScope::new(),
        }
    }

    /// Arm on `task_id` and locate it if possible. Outside a Tokio runtime
    /// the machine still transitions but no expiry timer is scheduled.
    pub fn arm<H: HighlightHost + ?Sized>(&self, task_id: &str, host: &mut H) -> HighlightState {
        if self.scope.is_released() {
            return HighlightState::Idle;
        }
        let state = lock(&self.machine)
            .arm(task_id, host, Instant::now())
            .clone();
        self.schedule_expiry(&state);
        state
    }

    /// Arm from navigation intent; does nothing when it names no target.
    pub fn arm_from_intent<H: HighlightHost + ?Sized>(
        &self,
        intent: &NavigationIntent,
        host: &mut H,
    ) -> Option<HighlightState> {
        let target = intent.target_task.as_deref()?;
        Some(self.arm(target, host))
    }

    pub fn evaluate<H: HighlightHost + ?Sized>(&self, host: &mut H) -> HighlightState {
        let mut machine = lock(&self.machine);
        let was_located = matches!(machine.state(), HighlightState::Located { .. });
        let state = machine.evaluate(host, Instant::now()).clone();
        drop(machine);
        if !was_located {
            self.schedule_expiry(&state);
        }
        state
    }

    pub fn state(&self) -> HighlightState {
        lock(&self.machine).state().clone()
    }

    pub fn is_highlighted(&self, task_id: &str) -> bool {
        lock(&self.machine).is_highlighted(task_id)
    }

    /// Cancel timers and forget the target. Idempotent.
    pub fn teardown(&self) {
        self.scope.release();
        lock(&self.machine).reset();
    }

    fn schedule_expiry(&self, state: &HighlightState) {
        let HighlightState::Located { target, expires_at } = state else {
            return;
        };
        info!(task_id = %target, "highlight located");
        let machine = self.machine.clone();
        let expires_at = *expires_at;
        self.scope.spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            // A newer arm may have replaced this target; `expire` checks the deadline.
            if lock(&machine).expire(Instant::now()) {
                debug!("highlight expired");
            }
        });
    }
}

impl Drop for Highlighter {
    fn drop(&mut self) {
        self.scope.release();
    }
}

fn lock(machine: &Mutex<HighlightMachine>) -> MutexGuard<'_, HighlightMachine> {
    machine.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Paginated list of `total` tasks named `t-1..=t-total`.
    struct FakeList {
        ids: Vec<String>,
        hidden_by_status: Vec<String>,
        status_filter: bool,
        page_size: usize,
        page: usize,
        page_changes: usize,
        scrolled: Vec<String>,
    }

    impl FakeList {
        fn new(total: usize, page_size: usize) -> Self {
            Self {
                ids: (1..=total).map(|i| format!("t-{}", i)).collect(),
                hidden_by_status: Vec::new(),
                status_filter: false,
                page_size,
                page: 1,
                page_changes: 0,
                scrolled: Vec::new(),
            }
        }

        fn rendered(&self) -> Vec<String> {
            let ids = self.filtered_ids();
            if self.page_size == 0 {
                return ids;
            }
            ids.into_iter()
                .skip((self.page - 1) * self.page_size)
                .take(self.page_size)
                .collect()
        }
    }

    impl HighlightHost for FakeList {
        fn reveal_all(&mut self) {
            self.status_filter = false;
        }

        fn filtered_ids(&self) -> Vec<String> {
            self.ids
                .iter()
                .filter(|id| !(self.status_filter && self.hidden_by_status.contains(id)))
                .cloned()
                .collect()
        }

        fn page_size(&self) -> usize {
            self.page_size
        }

        fn current_page(&self) -> usize {
            self.page
        }

        fn go_to_page(&mut self, page: usize) {
            self.page = page;
            self.page_changes += 1;
        }

        fn scroll_into_view(&mut self, task_id: &str) -> bool {
            if self.rendered().iter().any(|id| id == task_id) {
                self.scrolled.push(task_id.to_string());
                true
            } else {
                false
            }
        }
    }

    #[test]
    fn arming_target_on_page_three_pages_and_locates() {
        let mut list = FakeList::new(50, 10);
        let mut machine = HighlightMachine::default();
        let now = Instant::now();

        let state = machine.arm("t-25", &mut list, now).clone();
        assert_eq!(list.page, 3);
        assert_eq!(list.scrolled, vec!["t-25".to_string()]);
        assert_eq!(
            state,
            HighlightState::Located {
                target: "t-25".to_string(),
                expires_at: now + HIGHLIGHT_DWELL
            }
        );
        assert!(machine.is_highlighted("t-25"));
        assert!(!machine.is_highlighted("t-24"));
    }

    #[test]
    fn arming_clears_hiding_status_filter() {
        let mut list = FakeList::new(5, 0);
        list.status_filter = true;
        list.hidden_by_status.push("t-4".to_string());
        let mut machine = HighlightMachine::default();

        machine.arm("t-4", &mut list, Instant::now());
        assert!(!list.status_filter);
        assert!(machine.is_highlighted("t-4"));
        assert_eq!(list.page_changes, 0);
    }

    #[test]
    fn missing_target_stays_armed_until_it_appears() {
        let mut list = FakeList::new(3, 0);
        let mut machine = HighlightMachine::default();
        let now = Instant::now();

        let state = machine.arm("t-9", &mut list, now).clone();
        assert_eq!(
            state,
            HighlightState::Unreachable {
                target: "t-9".to_string()
            }
        );
        assert_eq!(machine.evaluate(&mut list, now).target(), Some("t-9"));
        assert!(!machine.is_highlighted("t-9"));

        list.ids.push("t-9".to_string());
        machine.evaluate(&mut list, now);
        assert!(machine.is_highlighted("t-9"));
    }

    #[test]
    fn unrendered_row_keeps_machine_armed() {
        struct Lazy {
            ready: bool,
        }
        impl HighlightHost for Lazy {
            fn reveal_all(&mut self) {}
            fn filtered_ids(&self) -> Vec<String> {
                vec!["a".to_string()]
            }
            fn page_size(&self) -> usize {
                0
            }
            fn current_page(&self) -> usize {
                1
            }
            fn go_to_page(&mut self, _page: usize) {}
            fn scroll_into_view(&mut self, _task_id: &str) -> bool {
                self.ready
            }
        }

        let mut host = Lazy { ready: false };
        let mut machine = HighlightMachine::default();
        let now = Instant::now();
        assert_eq!(
            machine.arm("a", &mut host, now),
            &HighlightState::Armed {
                target: "a".to_string()
            }
        );
        host.ready = true;
        assert!(matches!(
            machine.evaluate(&mut host, now),
            HighlightState::Located { .. }
        ));
    }

    #[test]
    fn expire_only_after_dwell() {
        let mut list = FakeList::new(3, 0);
        let mut machine = HighlightMachine::default();
        let now = Instant::now();
        machine.arm("t-2", &mut list, now);

        assert!(!machine.expire(now + Duration::from_millis(2599)));
        assert!(machine.expire(now + HIGHLIGHT_DWELL));
        assert_eq!(machine.state(), &HighlightState::Idle);
        assert!(!machine.expire(now + Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn located_highlight_clears_after_dwell() {
        let mut list = FakeList::new(50, 10);
        let highlighter = Highlighter::default();

        let state = highlighter.arm("t-25", &mut list);
        assert!(matches!(state, HighlightState::Located { .. }));
        assert_eq!(list.page, 3);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(highlighter.is_highlighted("t-25"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!highlighter.is_highlighted("t-25"));
        assert_eq!(highlighter.state(), HighlightState::Idle);
    }

    #[test]
    fn arming_without_runtime_locates_but_does_not_expire() {
        let mut list = FakeList::new(50, 10);
        let highlighter = Highlighter::default();

        let state = highlighter.arm("t-25", &mut list);
        assert!(matches!(state, HighlightState::Located { .. }));
        assert_eq!(list.page, 3);
        assert!(highlighter.is_highlighted("t-25"));
        assert_eq!(highlighter.scope.live_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_target_and_old_timer_is_harmless() {
        let mut list = FakeList::new(10, 0);
        let highlighter = Highlighter::default();

        highlighter.arm("t-1", &mut list);
        tokio::time::sleep(Duration::from_millis(2000)).await;
        highlighter.arm("t-2", &mut list);
        assert!(!highlighter.is_highlighted("t-1"));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(highlighter.is_highlighted("t-2"));
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(highlighter.state(), HighlightState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn intent_without_target_is_ignored_and_teardown_resets() {
        let mut list = FakeList::new(10, 0);
        let highlighter = Highlighter::default();

        assert!(highlighter
            .arm_from_intent(&NavigationIntent::default(), &mut list)
            .is_none());
        highlighter.arm_from_intent(&NavigationIntent::to_task("t-3"), &mut list);
        assert!(highlighter.is_highlighted("t-3"));

        highlighter.teardown();
        highlighter.teardown();
        assert_eq!(highlighter.state(), HighlightState::Idle);
        assert_eq!(highlighter.arm("t-4", &mut list), HighlightState::Idle);
    }
}
