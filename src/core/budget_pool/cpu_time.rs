//! Token-bucket budget pool measured in CPU time.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{next_budget_pool_id, BudgetPool, BudgetPoolId};
use crate::util::{duration_to_nanos, QueueId};

/// Parameters for [`CpuTimeBudgetPool`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuTimeBudgetConfig {
    /// Fraction of wall time credited back as budget, in `0.0..=1.0`.
    pub cpu_percentage: f64,
    /// Budget available when the pool is created.
    pub initial_budget: Duration,
    /// Cap on accumulated budget. `None` means unbounded.
    pub max_budget_level: Option<Duration>,
    /// Maximum debt; the budget level never drops below `-max_debt`.
    pub max_debt: Duration,
}

impl Default for CpuTimeBudgetConfig {
    fn default() -> Self {
        Self {
            cpu_percentage: 0.01,
            initial_budget: Duration::from_millis(10),
            max_budget_level: Some(Duration::from_millis(100)),
            max_debt: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
struct CpuTimeState {
    /// Signed budget in nanoseconds as of `last_checkpoint`.
    budget_level: i64,
    last_checkpoint: Instant,
    queues: BTreeSet<QueueId>,
}

/// Token bucket: running tasks spend budget, wall time refills it at
/// `cpu_percentage`. Member queues may run while the level is positive.
#[derive(Debug)]
pub struct CpuTimeBudgetPool {
    id: BudgetPoolId,
    name: String,
    config: CpuTimeBudgetConfig,
    state: Mutex<CpuTimeState>,
}

impl CpuTimeBudgetPool {
    /// Create a pool whose refill clock starts at `now`.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CpuTimeBudgetConfig, now: Instant) -> Self {
        let budget_level = duration_to_nanos(config.initial_budget);
        Self {
            id: next_budget_pool_id(),
            name: name.into(),
            config,
            state: Mutex::new(CpuTimeState {
                budget_level,
                last_checkpoint: now,
                queues: BTreeSet::new(),
            }),
        }
    }

    /// Pool parameters.
    #[must_use]
    pub const fn config(&self) -> &CpuTimeBudgetConfig {
        &self.config
    }

    /// Budget level at `now` in nanoseconds; negative while in debt.
    #[must_use]
    pub fn budget_level_nanos(&self, now: Instant) -> i64 {
        let state = self.state.lock();
        self.level_at(&state, now)
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn level_at(&self, state: &CpuTimeState, now: Instant) -> i64 {
        let elapsed = duration_to_nanos(now.saturating_duration_since(state.last_checkpoint));
        let refill = (elapsed as f64 * self.config.cpu_percentage) as i64;
        let level = state.budget_level.saturating_add(refill);
        match self.config.max_budget_level {
            // Refill never pushes the level past the cap, but an initial
            // budget above the cap is kept until spent.
            Some(max) if refill > 0 => level.min(duration_to_nanos(max).max(state.budget_level)),
            _ => level,
        }
    }

    fn advance(&self, state: &mut CpuTimeState, now: Instant) {
        if now > state.last_checkpoint {
            state.budget_level = self.level_at(state, now);
            state.last_checkpoint = now;
        }
    }
}

impl BudgetPool for CpuTimeBudgetPool {
    fn id(&self) -> BudgetPoolId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn can_run_now(&self, now: Instant) -> bool {
        self.budget_level_nanos(now) > 0
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn next_allowed_run_time(&self, now: Instant) -> Option<Instant> {
        let level = self.budget_level_nanos(now);
        if level > 0 {
            return Some(now);
        }
        // Refill can never lift the level above zero.
        let capped_at_zero = self.config.max_budget_level.is_some_and(|max| max.is_zero());
        if self.config.cpu_percentage <= 0.0 || capped_at_zero {
            return None;
        }
        let deficit = level.unsigned_abs().saturating_add(1) as f64;
        let wait_nanos = (deficit / self.config.cpu_percentage).ceil() as u64;
        now.checked_add(Duration::from_nanos(wait_nanos.saturating_add(1)))
    }

    fn record_task_run(&self, queue: QueueId, start: Instant, end: Instant) {
        let mut state = self.state.lock();
        self.advance(&mut state, end);
        let used = duration_to_nanos(end.saturating_duration_since(start));
        let floor = duration_to_nanos(self.config.max_debt).saturating_neg();
        state.budget_level = state.budget_level.saturating_sub(used).max(floor);
        tracing::trace!(
            pool = %self.name,
            queue,
            used_ns = used,
            level_ns = state.budget_level,
            "recorded task run"
        );
    }

    fn add_queue(&self, now: Instant, queue: QueueId) {
        let mut state = self.state.lock();
        self.advance(&mut state, now);
        state.queues.insert(queue);
    }

    fn remove_queue(&self, now: Instant, queue: QueueId) -> bool {
        let mut state = self.state.lock();
        self.advance(&mut state, now);
        state.queues.remove(&queue)
    }

    fn queue_ids(&self) -> Vec<QueueId> {
        self.state.lock().queues.iter().copied().collect()
    }
}
