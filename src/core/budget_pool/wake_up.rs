//! Fixed-window budget pool: member queues run only inside short windows
//! that open at a regular interval, coalescing their wake-ups.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{next_budget_pool_id, BudgetPool, BudgetPoolId};
use crate::util::QueueId;

/// Parameters for [`WakeUpBudgetPool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeUpBudgetConfig {
    /// Distance between the starts of two consecutive windows.
    pub wake_up_interval: Duration,
    /// Length of each window.
    pub wake_up_duration: Duration,
}

impl Default for WakeUpBudgetConfig {
    fn default() -> Self {
        Self {
            wake_up_interval: Duration::from_secs(1),
            wake_up_duration: Duration::from_millis(3),
        }
    }
}

#[derive(Debug, Default)]
struct WakeUpState {
    queues: BTreeSet<QueueId>,
    last_wake_up: Option<Instant>,
    runs_in_last_window: u64,
}

/// Windows open at `epoch + k * wake_up_interval` and stay open for
/// `wake_up_duration`.
#[derive(Debug)]
pub struct WakeUpBudgetPool {
    id: BudgetPoolId,
    name: String,
    config: WakeUpBudgetConfig,
    epoch: Instant,
    state: Mutex<WakeUpState>,
}

impl WakeUpBudgetPool {
    /// Create a pool whose first window opens at `now`.
    #[must_use]
    pub fn new(name: impl Into<String>, config: WakeUpBudgetConfig, now: Instant) -> Self {
        Self {
            id: next_budget_pool_id(),
            name: name.into(),
            config,
            epoch: now,
            state: Mutex::new(WakeUpState::default()),
        }
    }

    /// Pool parameters.
    #[must_use]
    pub const fn config(&self) -> &WakeUpBudgetConfig {
        &self.config
    }

    /// Start of the most recent window in which a member task ran.
    #[must_use]
    pub fn last_wake_up(&self) -> Option<Instant> {
        self.state.lock().last_wake_up
    }

    /// Number of member tasks recorded in the window `last_wake_up` opened.
    #[must_use]
    pub fn runs_in_last_window(&self) -> u64 {
        self.state.lock().runs_in_last_window
    }

    /// Start of the window containing (or most recently preceding) `now`.
    fn window_start(&self, now: Instant) -> Instant {
        let interval = self.config.wake_up_interval.as_nanos();
        if interval == 0 {
            return now;
        }
        let elapsed = now.saturating_duration_since(self.epoch).as_nanos();
        let offset = elapsed - elapsed % interval;
        self.epoch + Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX))
    }
}

impl BudgetPool for WakeUpBudgetPool {
    fn id(&self) -> BudgetPoolId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn can_run_now(&self, now: Instant) -> bool {
        if now < self.epoch {
            return false;
        }
        if self.config.wake_up_duration >= self.config.wake_up_interval {
            return true;
        }
        now < self.window_start(now) + self.config.wake_up_duration
    }

    fn next_allowed_run_time(&self, now: Instant) -> Option<Instant> {
        if self.can_run_now(now) {
            return Some(now);
        }
        if now < self.epoch {
            return Some(self.epoch);
        }
        self.window_start(now)
            .checked_add(self.config.wake_up_interval)
    }

    fn record_task_run(&self, queue: QueueId, start: Instant, _end: Instant) {
        let window = self.window_start(start);
        let mut state = self.state.lock();
        if state.last_wake_up == Some(window) {
            state.runs_in_last_window += 1;
        } else {
            state.last_wake_up = Some(window);
            state.runs_in_last_window = 1;
        }
        tracing::trace!(pool = %self.name, queue, "recorded task run in wake-up window");
    }

    fn add_queue(&self, _now: Instant, queue: QueueId) {
        self.state.lock().queues.insert(queue);
    }

    fn remove_queue(&self, _now: Instant, queue: QueueId) -> bool {
        self.state.lock().queues.remove(&queue)
    }

    fn queue_ids(&self) -> Vec<QueueId> {
        self.state.lock().queues.iter().copied().collect()
    }
}
