//! Budget pools: shared throttling policies consulted for throttled queues.
//!
//! A queue may belong to any number of pools. While its throttle ref-count is
//! non-zero it only runs when *every* pool it belongs to allows running; with a
//! ref-count of zero pools are not consulted at all.
//!
//! Two policies are provided:
//!
//! - [`CpuTimeBudgetPool`]: token bucket refilled at a fraction of wall time.
//! - [`WakeUpBudgetPool`]: fixed windows opening at a regular interval.

mod cpu_time;
mod wake_up;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::util::QueueId;

pub use cpu_time::{CpuTimeBudgetConfig, CpuTimeBudgetPool};
pub use wake_up::{WakeUpBudgetConfig, WakeUpBudgetPool};

/// Process-unique budget pool identifier.
pub type BudgetPoolId = u64;

static NEXT_BUDGET_POOL_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_budget_pool_id() -> BudgetPoolId {
    NEXT_BUDGET_POOL_ID.fetch_add(1, Ordering::Relaxed)
}

/// Shared throttling policy.
///
/// Accounting is mutated only by [`BudgetPool::record_task_run`], which the
/// sequence manager calls from its run loop after each task of a member queue.
/// Membership calls carry the current time so time-based pools can settle
/// elapsed budget at the boundary.
pub trait BudgetPool: Send + Sync + fmt::Debug {
    /// Process-unique identifier.
    fn id(&self) -> BudgetPoolId;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Whether member queues may run at `now`.
    fn can_run_now(&self, now: Instant) -> bool;

    /// Earliest time at or after `now` when running is allowed, or `None` if
    /// the pool will never allow it without further input.
    fn next_allowed_run_time(&self, now: Instant) -> Option<Instant>;

    /// Account for a task of `queue` that ran from `start` to `end`.
    fn record_task_run(&self, queue: QueueId, start: Instant, end: Instant);

    /// Register `queue` as a member.
    fn add_queue(&self, now: Instant, queue: QueueId);

    /// Remove `queue`; returns whether it was a member.
    fn remove_queue(&self, now: Instant, queue: QueueId) -> bool;

    /// Current members, in ascending id order.
    fn queue_ids(&self) -> Vec<QueueId>;
}
