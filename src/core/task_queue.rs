//! Task queues, task runners and queue-enabled voters.
//!
//! Posting goes through a per-queue `crossbeam-channel` so any thread can
//! enqueue without touching the owner-thread state. The sequence manager drains
//! the channel into the queue's work lists when it selects the next task.

use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::budget_pool::BudgetPool;
use super::sequence_manager::{is_current_manager, ManagerShared};
use super::task::{DelayedTask, Task, TaskFn};
use super::SchedulerError;
use crate::util::{QueueId, QueuePriority, TaskId, TaskType, WebSchedulingPriority};

/// Creation parameters for a task queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQueueSpec {
    /// Queue name used in logs, metrics and errors.
    pub name: String,
    /// Initial priority.
    pub priority: QueuePriority,
    /// Whether the throttle ref-count may be raised on this queue.
    pub can_be_throttled: bool,
    /// Whether tasks from this queue clear the quiescence bit.
    pub should_monitor_quiescence: bool,
    /// Whether delayed tasks on this queue may wake the thread.
    pub non_waking: bool,
}

impl TaskQueueSpec {
    /// Spec with default settings: normal priority, not throttleable.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: QueuePriority::Normal,
            can_be_throttled: false,
            should_monitor_quiescence: false,
            non_waking: false,
        }
    }

    /// Set the initial priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: QueuePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Allow throttling.
    #[must_use]
    pub const fn with_can_be_throttled(mut self, can_be_throttled: bool) -> Self {
        self.can_be_throttled = can_be_throttled;
        self
    }

    /// Track this queue for quiescence.
    #[must_use]
    pub const fn with_should_monitor_quiescence(mut self, monitor: bool) -> Self {
        self.should_monitor_quiescence = monitor;
        self
    }

    /// Never wake the thread for delayed tasks on this queue.
    #[must_use]
    pub const fn with_non_waking(mut self, non_waking: bool) -> Self {
        self.non_waking = non_waking;
        self
    }
}

/// Owner-thread state, locked briefly by the manager and control calls.
struct QueueState {
    priority: QueuePriority,
    web_scheduling_priority: Option<WebSchedulingPriority>,
    throttle_ref_count: usize,
    disabled_votes: usize,
    budget_pools: Vec<Arc<dyn BudgetPool>>,
    incoming: Option<Receiver<Task>>,
    immediate: VecDeque<Task>,
    delayed: BinaryHeap<DelayedTask>,
}

/// Shared queue body. The manager holds it strongly; it points back at the
/// manager weakly.
pub(crate) struct TaskQueueInner {
    id: QueueId,
    name: String,
    can_be_throttled: bool,
    should_monitor_quiescence: bool,
    non_waking: bool,
    incoming_tx: Sender<Task>,
    manager: Weak<ManagerShared>,
    shut_down: AtomicBool,
    state: Mutex<QueueState>,
}

impl TaskQueueInner {
    pub(crate) fn new(id: QueueId, spec: TaskQueueSpec, manager: Weak<ManagerShared>) -> Arc<Self> {
        let (incoming_tx, incoming_rx) = unbounded();
        Arc::new(Self {
            id,
            name: spec.name,
            can_be_throttled: spec.can_be_throttled,
            should_monitor_quiescence: spec.should_monitor_quiescence,
            non_waking: spec.non_waking,
            incoming_tx,
            manager,
            shut_down: AtomicBool::new(false),
            state: Mutex::new(QueueState {
                priority: spec.priority,
                web_scheduling_priority: None,
                throttle_ref_count: 0,
                disabled_votes: 0,
                budget_pools: Vec::new(),
                incoming: Some(incoming_rx),
                immediate: VecDeque::new(),
                delayed: BinaryHeap::new(),
            }),
        })
    }

    pub(crate) const fn id(&self) -> QueueId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) const fn should_monitor_quiescence(&self) -> bool {
        self.should_monitor_quiescence
    }

    pub(crate) fn priority(&self) -> QueuePriority {
        self.state.lock().priority
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn shut_down_error(&self) -> SchedulerError {
        SchedulerError::InvalidState(format!("task queue `{}` is shut down", self.name))
    }

    fn post(
        &self,
        task_type: TaskType,
        delay: Option<Duration>,
        payload: TaskFn,
    ) -> Result<TaskId, SchedulerError> {
        if self.is_shut_down() {
            warn!(queue = %self.name, "rejected post to shut-down queue");
            return Err(self.shut_down_error());
        }
        let Some(manager) = self.manager.upgrade() else {
            return Err(SchedulerError::InvalidState(format!(
                "sequence manager of task queue `{}` has been destroyed",
                self.name
            )));
        };

        let now = manager.now();
        let delayed_run_time = delay.filter(|d| !d.is_zero()).map(|d| now + d);
        let task = Task::new(
            manager.next_task_id(),
            task_type,
            self.id,
            now,
            delayed_run_time,
            manager.next_sequence_num(),
            payload,
        );
        let task_id = task.id();

        self.incoming_tx.send(task).map_err(|_| {
            warn!(queue = %self.name, "rejected post: incoming channel closed");
            self.shut_down_error()
        })?;
        manager.schedule_work();
        Ok(task_id)
    }

    /// Move posted tasks into the work lists and promote due delayed tasks.
    ///
    /// Tasks that became ready since the last reload are appended in ready
    /// order, so the front of the list always holds the earliest ready key.
    pub(crate) fn reload(&self, now: Instant) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut ready = Vec::new();
        if let Some(incoming) = &state.incoming {
            for task in incoming.try_iter() {
                match task.delayed_run_time() {
                    Some(run_at) if run_at > now => state.delayed.push(DelayedTask(task)),
                    _ => ready.push(task),
                }
            }
        }
        while state.delayed.peek().is_some_and(|d| d.run_time() <= now) {
            if let Some(DelayedTask(task)) = state.delayed.pop() {
                ready.push(task);
            }
        }
        ready.sort_by_key(Task::ready_key);
        state.immediate.extend(ready);
    }

    /// `(priority, ready key of the front task)` if the queue can yield a
    /// task now.
    pub(crate) fn selection_key(
        &self,
        now: Instant,
        paused: bool,
    ) -> Option<(QueuePriority, (Instant, u64))> {
        if self.is_shut_down() {
            return None;
        }
        let state = self.state.lock();
        if state.disabled_votes > 0 {
            return None;
        }
        if paused && state.priority != QueuePriority::Control {
            return None;
        }
        let front = state.immediate.front()?;
        if Self::blocked_by_budget(&state, now) {
            return None;
        }
        Some((state.priority, front.ready_key()))
    }

    fn blocked_by_budget(state: &QueueState, now: Instant) -> bool {
        state.throttle_ref_count > 0 && state.budget_pools.iter().any(|p| !p.can_run_now(now))
    }

    pub(crate) fn take_next_task(&self) -> Option<Task> {
        self.state.lock().immediate.pop_front()
    }

    /// Earliest time this queue needs the thread awake, if any.
    pub(crate) fn next_wake_up(&self, now: Instant, paused: bool) -> Option<Instant> {
        if self.is_shut_down() {
            return None;
        }
        let state = self.state.lock();
        if state.disabled_votes > 0 {
            return None;
        }
        let mut wake_up = None;
        let dispatchable = !paused || state.priority == QueuePriority::Control;
        if dispatchable && !state.immediate.is_empty() && Self::blocked_by_budget(&state, now) {
            // Ready but throttled: wake when every pool allows running again.
            wake_up = state
                .budget_pools
                .iter()
                .map(|p| p.next_allowed_run_time(now))
                .try_fold(now, |latest, next| next.map(|t| latest.max(t)));
        }
        if !self.non_waking {
            if let Some(delayed) = state.delayed.peek() {
                let run_at = delayed.run_time();
                wake_up = Some(wake_up.map_or(run_at, |w: Instant| w.min(run_at)));
            }
        }
        wake_up
    }

    pub(crate) fn budget_pools(&self) -> Vec<Arc<dyn BudgetPool>> {
        self.state.lock().budget_pools.clone()
    }

    pub(crate) fn pending_task_count(&self) -> usize {
        let state = self.state.lock();
        let incoming = state.incoming.as_ref().map_or(0, Receiver::len);
        state.immediate.len() + state.delayed.len() + incoming
    }

    fn adjust_disabled_votes(&self, disable: bool) {
        let enabled_now = {
            let mut state = self.state.lock();
            if disable {
                state.disabled_votes += 1;
                false
            } else {
                state.disabled_votes = state.disabled_votes.saturating_sub(1);
                state.disabled_votes == 0
            }
        };
        if enabled_now {
            self.wake_manager();
        }
    }

    fn wake_manager(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.schedule_work();
        }
    }

    fn now(&self) -> Instant {
        self.manager
            .upgrade()
            .map_or_else(Instant::now, |manager| manager.now())
    }

    pub(crate) fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let (pools, dropped) = {
            let mut state = self.state.lock();
            let pools = std::mem::take(&mut state.budget_pools);
            let mut dropped: Vec<Task> = state.immediate.drain(..).collect();
            dropped.extend(state.delayed.drain().map(|d| d.0));
            if let Some(incoming) = state.incoming.take() {
                dropped.extend(incoming.try_iter());
            }
            (pools, dropped)
        };

        let now = self.now();
        for pool in &pools {
            pool.remove_queue(now, self.id);
        }
        let dropped_count = dropped.len();
        // Payload destructors run outside the queue lock.
        drop(dropped);

        if let Some(manager) = self.manager.upgrade() {
            manager.unregister_queue(self.id);
        }
        info!(
            queue = %self.name,
            dropped_tasks = dropped_count,
            "task queue shut down"
        );
    }
}

/// Owner-side handle to a task queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<TaskQueueInner>,
}

impl TaskQueue {
    pub(crate) const fn from_inner(inner: Arc<TaskQueueInner>) -> Self {
        Self { inner }
    }

    /// Queue identifier, unique within its manager.
    #[must_use]
    pub fn id(&self) -> QueueId {
        self.inner.id
    }

    /// Queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Create a runner posting tasks tagged with `task_type` to this queue.
    #[must_use]
    pub fn create_task_runner(&self, task_type: TaskType) -> TaskRunner {
        TaskRunner {
            queue: Arc::clone(&self.inner),
            task_type,
        }
    }

    /// Current priority.
    #[must_use]
    pub fn priority(&self) -> QueuePriority {
        self.inner.priority()
    }

    /// Change the priority; effective from the next selection.
    pub fn set_priority(&self, priority: QueuePriority) {
        let previous = {
            let mut state = self.inner.state.lock();
            std::mem::replace(&mut state.priority, priority)
        };
        if previous != priority {
            debug!(queue = %self.inner.name, ?previous, ?priority, "queue priority changed");
        }
    }

    /// Set the web scheduling priority and the matching queue priority.
    pub fn set_web_scheduling_priority(&self, priority: WebSchedulingPriority) {
        self.inner.state.lock().web_scheduling_priority = Some(priority);
        self.set_priority(priority.queue_priority());
    }

    /// Web scheduling priority, if one was set.
    #[must_use]
    pub fn web_scheduling_priority(&self) -> Option<WebSchedulingPriority> {
        self.inner.state.lock().web_scheduling_priority
    }

    /// Whether the queue was created throttleable.
    #[must_use]
    pub fn can_be_throttled(&self) -> bool {
        self.inner.can_be_throttled
    }

    /// Whether the throttle ref-count is non-zero.
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        self.throttle_ref_count() > 0
    }

    /// Current throttle ref-count.
    #[must_use]
    pub fn throttle_ref_count(&self) -> usize {
        self.inner.state.lock().throttle_ref_count
    }

    /// Start consulting budget pools for this queue (ref-counted).
    ///
    /// # Panics
    ///
    /// Panics with an invariant violation if the queue was not created
    /// throttleable.
    pub fn increase_throttle_ref_count(&self) {
        assert!(
            self.inner.can_be_throttled,
            "{}",
            SchedulerError::InvariantViolation(format!(
                "task queue `{}` cannot be throttled",
                self.inner.name
            ))
        );
        let count = {
            let mut state = self.inner.state.lock();
            state.throttle_ref_count += 1;
            state.throttle_ref_count
        };
        if count == 1 {
            debug!(queue = %self.inner.name, "queue throttled");
        }
    }

    /// Undo one [`increase_throttle_ref_count`](Self::increase_throttle_ref_count).
    ///
    /// # Panics
    ///
    /// Panics with an invariant violation when the count is already zero.
    pub fn decrease_throttle_ref_count(&self) {
        let count = {
            let mut state = self.inner.state.lock();
            if state.throttle_ref_count == 0 {
                drop(state);
                panic!(
                    "{}",
                    SchedulerError::InvariantViolation(format!(
                        "throttle ref count underflow on task queue `{}`",
                        self.inner.name
                    ))
                );
            }
            state.throttle_ref_count -= 1;
            state.throttle_ref_count
        };
        if count == 0 {
            debug!(queue = %self.inner.name, "queue unthrottled");
            self.inner.wake_manager();
        }
    }

    /// Join `pool`. Joining a pool twice is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the queue is shut down.
    pub fn add_to_budget_pool(
        &self,
        now: Instant,
        pool: Arc<dyn BudgetPool>,
    ) -> Result<(), SchedulerError> {
        if self.inner.is_shut_down() {
            return Err(self.inner.shut_down_error());
        }
        let mut state = self.inner.state.lock();
        if state.budget_pools.iter().any(|p| p.id() == pool.id()) {
            return Ok(());
        }
        pool.add_queue(now, self.inner.id);
        debug!(queue = %self.inner.name, pool = pool.name(), "joined budget pool");
        state.budget_pools.push(pool);
        Ok(())
    }

    /// Leave `pool`.
    ///
    /// # Errors
    ///
    /// `NotAMember` if the queue is not in `pool`; membership is unchanged.
    pub fn remove_from_budget_pool(
        &self,
        now: Instant,
        pool: &dyn BudgetPool,
    ) -> Result<(), SchedulerError> {
        let removed = {
            let mut state = self.inner.state.lock();
            let Some(index) = state.budget_pools.iter().position(|p| p.id() == pool.id()) else {
                return Err(SchedulerError::NotAMember {
                    queue: self.inner.name.clone(),
                    pool: pool.name().to_string(),
                });
            };
            state.budget_pools.remove(index)
        };
        removed.remove_queue(now, self.inner.id);
        debug!(queue = %self.inner.name, pool = pool.name(), "left budget pool");
        self.inner.wake_manager();
        Ok(())
    }

    /// Whether the queue is currently in `pool`.
    #[must_use]
    pub fn is_member_of(&self, pool: &dyn BudgetPool) -> bool {
        self.inner
            .state
            .lock()
            .budget_pools
            .iter()
            .any(|p| p.id() == pool.id())
    }

    /// Whether the queue is throttled and some pool forbids running at `now`.
    #[must_use]
    pub fn is_blocked_by_budget(&self, now: Instant) -> bool {
        TaskQueueInner::blocked_by_budget(&self.inner.state.lock(), now)
    }

    /// Create a voter; the queue is enabled while every voter votes enabled.
    /// New voters vote enabled.
    #[must_use]
    pub fn create_enabled_voter(&self) -> QueueEnabledVoter {
        QueueEnabledVoter {
            queue: Arc::clone(&self.inner),
            enabled: true,
        }
    }

    /// Whether the queue may yield tasks (ignoring throttling).
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.inner.is_shut_down() && self.inner.state.lock().disabled_votes == 0
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Tasks posted but not yet run, including delayed ones.
    #[must_use]
    pub fn pending_task_count(&self) -> usize {
        self.inner.pending_task_count()
    }

    /// Shut the queue down: leave all budget pools, disable it, drop every
    /// pending task without running it and reject further posts. A task of
    /// this queue that is already running is not interrupted. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("shut_down", &self.inner.is_shut_down())
            .finish_non_exhaustive()
    }
}

/// Thread-safe posting handle bound to a queue and a task type.
#[derive(Clone)]
pub struct TaskRunner {
    queue: Arc<TaskQueueInner>,
    task_type: TaskType,
}

impl TaskRunner {
    /// Task type attached to posted tasks.
    #[must_use]
    pub const fn task_type(&self) -> TaskType {
        self.task_type
    }

    /// Id of the target queue.
    #[must_use]
    pub fn queue_id(&self) -> QueueId {
        self.queue.id
    }

    /// Name of the target queue.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue.name
    }

    /// Post `f` to run as soon as the queue is selected.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the queue is shut down or its manager is gone.
    pub fn post_task<F>(&self, f: F) -> Result<TaskId, SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.post(self.task_type, None, Box::new(f))
    }

    /// Post `f` to run no earlier than `delay` from now.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the queue is shut down or its manager is gone.
    pub fn post_delayed_task<F>(&self, delay: Duration, f: F) -> Result<TaskId, SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.post(self.task_type, Some(delay), Box::new(f))
    }

    /// Whether the calling thread is the one running this queue's tasks.
    #[must_use]
    pub fn runs_tasks_in_current_sequence(&self) -> bool {
        is_current_manager(&self.queue.manager)
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("queue", &self.queue.name)
            .field("task_type", &self.task_type)
            .finish()
    }
}

/// One vote on whether a queue is enabled. Dropping the voter withdraws its
/// vote.
pub struct QueueEnabledVoter {
    queue: Arc<TaskQueueInner>,
    enabled: bool,
}

impl QueueEnabledVoter {
    /// Change this voter's vote.
    pub fn set_vote_to_enable(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        self.queue.adjust_disabled_votes(!enabled);
    }

    /// Current vote.
    #[must_use]
    pub const fn is_voting_to_enable(&self) -> bool {
        self.enabled
    }
}

impl Drop for QueueEnabledVoter {
    fn drop(&mut self) {
        if !self.enabled {
            self.queue.adjust_disabled_votes(false);
        }
    }
}

impl fmt::Debug for QueueEnabledVoter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEnabledVoter")
            .field("queue", &self.queue.name)
            .field("enabled", &self.enabled)
            .finish()
    }
}
