//! The sequence manager: owns a thread's task queues, selects the next task by
//! priority and throttling, runs it and reports timing to observers.
//!
//! Posting is safe from any thread. Everything else (selection, running,
//! pausing, observer registration, queue creation) is an owner-thread
//! operation: the manager is bound to one thread by
//! [`SequenceManager::attach_to_current_thread`] and rejects calls from any
//! other thread with [`SchedulerError::InvalidState`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info};

use super::observer::{notify_observers, ModeChange, ObserverId, ObserverList, TaskObserver};
use super::task::{Task, TaskInfo, TaskOutcome, TaskTiming};
use super::task_queue::{TaskQueue, TaskQueueInner, TaskQueueSpec, TaskRunner};
use super::SchedulerError;
use crate::util::{Clock, QueuePriority, RailMode, TaskId, TaskType};

/// Name of the built-in control queue.
pub const CONTROL_QUEUE_NAME: &str = "control";
/// Name of the built-in default queue.
pub const DEFAULT_QUEUE_NAME: &str = "default";
/// Name of the built-in non-waking queue.
pub const NON_WAKING_QUEUE_NAME: &str = "non_waking";

/// Observable phase of the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SchedulerState {
    /// Nothing is being selected or run.
    #[default]
    Idle,
    /// Looking for the next runnable task.
    Selecting,
    /// A task body is executing.
    Running,
}

/// Wake flags guarded by the manager's condvar mutex.
#[derive(Debug, Default)]
struct WakeState {
    work_available: bool,
    quit: bool,
}

type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// State shared between the manager, its queues and its handles.
pub(crate) struct ManagerShared {
    clock: Arc<dyn Clock>,
    next_task_id: AtomicU64,
    next_sequence_num: AtomicU64,
    next_queue_id: AtomicU64,
    wake_state: Mutex<WakeState>,
    wake_condvar: Condvar,
    queues: Mutex<Vec<Arc<TaskQueueInner>>>,
    observers: Mutex<ObserverList>,
    pause_count: Mutex<usize>,
    rail_mode: Mutex<RailMode>,
    bound_thread: Mutex<Option<ThreadId>>,
    state: Mutex<SchedulerState>,
    completion_callbacks: Mutex<Vec<CompletionCallback>>,
    monitored_task_ran: AtomicBool,
    task_runners: Arc<RwLock<HashMap<TaskType, TaskRunner>>>,
}

impl ManagerShared {
    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    pub(crate) fn next_task_id(&self) -> TaskId {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_sequence_num(&self) -> u64 {
        self.next_sequence_num.fetch_add(1, Ordering::Relaxed)
    }

    /// Wake the run loop if it is blocked.
    pub(crate) fn schedule_work(&self) {
        let mut wake = self.wake_state.lock();
        wake.work_available = true;
        self.wake_condvar.notify_one();
    }

    pub(crate) fn unregister_queue(&self, id: u64) {
        self.queues.lock().retain(|q| q.id() != id);
    }

    fn quit(&self) {
        let mut wake = self.wake_state.lock();
        wake.quit = true;
        self.wake_condvar.notify_all();
    }

    fn is_paused(&self) -> bool {
        *self.pause_count.lock() > 0
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.lock() = state;
    }

    fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    fn check_owner(&self, operation: &str) -> Result<(), SchedulerError> {
        match *self.bound_thread.lock() {
            Some(owner) if owner == thread::current().id() => Ok(()),
            Some(_) => Err(SchedulerError::InvalidState(format!(
                "`{operation}` called off the sequence manager's thread"
            ))),
            None => Err(SchedulerError::InvalidState(format!(
                "`{operation}` called before the sequence manager was attached to a thread"
            ))),
        }
    }

    fn queue_snapshot(&self) -> Vec<Arc<TaskQueueInner>> {
        self.queues.lock().clone()
    }

    fn resume_one(&self) {
        let resumed = {
            let mut count = self.pause_count.lock();
            *count = count.saturating_sub(1);
            *count == 0
        };
        if resumed {
            info!("scheduler resumed");
            notify_observers(&self.observers, |o| o.on_mode_changed(ModeChange::Resumed));
            self.schedule_work();
        }
    }
}

struct CurrentManager {
    shared: Weak<ManagerShared>,
    default_runner: TaskRunner,
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentManager>> = const { RefCell::new(None) };
}

/// Whether `manager` is the one attached to the calling thread.
pub(crate) fn is_current_manager(manager: &Weak<ManagerShared>) -> bool {
    CURRENT
        .try_with(|current| {
            current
                .borrow()
                .as_ref()
                .is_some_and(|c| Weak::ptr_eq(&c.shared, manager))
        })
        .unwrap_or(false)
}

fn current_shared() -> Option<Arc<ManagerShared>> {
    CURRENT
        .try_with(|current| current.borrow().as_ref().and_then(|c| c.shared.upgrade()))
        .ok()
        .flatten()
}

/// Default task runner of the manager attached to the calling thread.
#[must_use]
pub fn current_task_runner() -> Option<TaskRunner> {
    CURRENT
        .try_with(|current| current.borrow().as_ref().map(|c| c.default_runner.clone()))
        .ok()
        .flatten()
}

/// Handle to the manager attached to the calling thread.
#[must_use]
pub fn current_handle() -> Option<SequenceManagerHandle> {
    current_shared().map(|shared| SequenceManagerHandle {
        shared: Arc::downgrade(&shared),
    })
}

/// Run `callback` after the task currently running on this thread completes.
///
/// # Errors
///
/// `InvalidState` if no manager is attached to this thread or no task is
/// running.
pub fn add_task_completion_callback<F>(callback: F) -> Result<(), SchedulerError>
where
    F: FnOnce() + Send + 'static,
{
    let shared = current_shared().ok_or_else(|| {
        SchedulerError::InvalidState("no sequence manager attached to this thread".into())
    })?;
    push_completion_callback(&shared, Box::new(callback))
}

fn push_completion_callback(
    shared: &ManagerShared,
    callback: CompletionCallback,
) -> Result<(), SchedulerError> {
    if shared.state() != SchedulerState::Running {
        return Err(SchedulerError::InvalidState(
            "completion callbacks can only be added while a task is running".into(),
        ));
    }
    shared.completion_callbacks.lock().push(callback);
    Ok(())
}

/// Scoped pause token. While at least one exists only `Control` queues run.
///
/// Not `Send`: it must be dropped on the thread that created it.
#[must_use = "the scheduler resumes as soon as the handle is dropped"]
pub struct PauseHandle {
    shared: Weak<ManagerShared>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for PauseHandle {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.resume_one();
        }
    }
}

impl fmt::Debug for PauseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PauseHandle").finish_non_exhaustive()
    }
}

/// Cloneable, thread-safe handle to a manager.
///
/// Does not keep the manager alive; calls on a destroyed manager are no-ops.
#[derive(Clone)]
pub struct SequenceManagerHandle {
    shared: Weak<ManagerShared>,
}

/// Handle used to stop [`SequenceManager::run`].
pub type QuitHandle = SequenceManagerHandle;

impl SequenceManagerHandle {
    /// Make [`SequenceManager::run`] return after the current task.
    pub fn quit(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.quit();
        }
    }

    /// Unregister an observer. Safe to call from inside an observer callback;
    /// the removed observer is not called again, even later in the same
    /// dispatch.
    pub fn remove_task_observer(&self, id: ObserverId) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.observers.lock().remove(id))
    }

    /// Whether a pause handle is alive.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.upgrade().is_some_and(|s| s.is_paused())
    }

    /// Current run-loop phase; `Idle` once the manager is gone.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.shared
            .upgrade()
            .map_or(SchedulerState::Idle, |s| s.state())
    }

    /// Whether the manager still exists.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.shared.strong_count() > 0
    }
}

impl fmt::Debug for SequenceManagerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceManagerHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Task-type to runner lookup, readable from any thread.
#[derive(Clone, Default)]
pub struct TaskRunnerTable {
    runners: Arc<RwLock<HashMap<TaskType, TaskRunner>>>,
}

impl TaskRunnerTable {
    /// Runner registered for `task_type`.
    #[must_use]
    pub fn get(&self, task_type: TaskType) -> Option<TaskRunner> {
        self.runners.read().get(&task_type).cloned()
    }

    /// Registered task types.
    #[must_use]
    pub fn task_types(&self) -> Vec<TaskType> {
        self.runners.read().keys().copied().collect()
    }
}

impl fmt::Debug for TaskRunnerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunnerTable")
            .field("task_types", &self.task_types())
            .finish()
    }
}

/// Per-thread cooperative scheduler.
pub struct SequenceManager {
    shared: Arc<ManagerShared>,
    default_task_type: TaskType,
    control_queue: TaskQueue,
    default_queue: TaskQueue,
    non_waking_queue: TaskQueue,
}

impl SequenceManager {
    /// Create a manager with the built-in control, default and non-waking
    /// queues. The manager must be attached to a thread before use.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_default_task_type(clock, TaskType::Default)
    }

    /// Like [`new`](Self::new) with a custom type for the default runner.
    #[must_use]
    pub fn with_default_task_type(clock: Arc<dyn Clock>, default_task_type: TaskType) -> Self {
        let shared = Arc::new(ManagerShared {
            clock,
            next_task_id: AtomicU64::new(1),
            next_sequence_num: AtomicU64::new(1),
            next_queue_id: AtomicU64::new(1),
            wake_state: Mutex::new(WakeState::default()),
            wake_condvar: Condvar::new(),
            queues: Mutex::new(Vec::new()),
            observers: Mutex::new(ObserverList::default()),
            pause_count: Mutex::new(0),
            rail_mode: Mutex::new(RailMode::default()),
            bound_thread: Mutex::new(None),
            state: Mutex::new(SchedulerState::Idle),
            completion_callbacks: Mutex::new(Vec::new()),
            monitored_task_ran: AtomicBool::new(false),
            task_runners: Arc::new(RwLock::new(HashMap::new())),
        });

        let control_queue = Self::register_queue(
            &shared,
            TaskQueueSpec::new(CONTROL_QUEUE_NAME).with_priority(QueuePriority::Control),
        );
        let default_queue = Self::register_queue(&shared, TaskQueueSpec::new(DEFAULT_QUEUE_NAME));
        let non_waking_queue = Self::register_queue(
            &shared,
            TaskQueueSpec::new(NON_WAKING_QUEUE_NAME).with_non_waking(true),
        );

        Self {
            shared,
            default_task_type,
            control_queue,
            default_queue,
            non_waking_queue,
        }
    }

    fn register_queue(shared: &Arc<ManagerShared>, spec: TaskQueueSpec) -> TaskQueue {
        let id = shared.next_queue_id.fetch_add(1, Ordering::Relaxed);
        let name = spec.name.clone();
        let priority = spec.priority;
        let inner = TaskQueueInner::new(id, spec, Arc::downgrade(shared));
        shared.queues.lock().push(Arc::clone(&inner));
        debug!(queue = %name, id, ?priority, "task queue created");
        TaskQueue::from_inner(inner)
    }

    /// Bind the manager to the calling thread and make it the thread's
    /// current manager.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the manager is bound to another thread or another
    /// manager is already attached to this thread.
    pub fn attach_to_current_thread(&self) -> Result<(), SchedulerError> {
        let this_thread = thread::current().id();
        {
            let mut bound = self.shared.bound_thread.lock();
            match *bound {
                Some(owner) if owner != this_thread => {
                    return Err(SchedulerError::InvalidState(
                        "sequence manager is already attached to another thread".into(),
                    ));
                }
                Some(_) => return Ok(()),
                None => {}
            }
            let occupied = CURRENT.with(|current| {
                current
                    .borrow()
                    .as_ref()
                    .is_some_and(|c| c.shared.strong_count() > 0)
            });
            if occupied {
                return Err(SchedulerError::InvalidState(
                    "another sequence manager is attached to this thread".into(),
                ));
            }
            *bound = Some(this_thread);
        }
        let weak = Arc::downgrade(&self.shared);
        let default_runner = self.default_task_runner();
        CURRENT.with(|current| {
            *current.borrow_mut() = Some(CurrentManager {
                shared: weak,
                default_runner,
            });
        });
        info!(thread = ?this_thread, "sequence manager attached");
        Ok(())
    }

    /// Undo [`attach_to_current_thread`](Self::attach_to_current_thread).
    ///
    /// # Errors
    ///
    /// `InvalidState` when called off the owner thread.
    pub fn detach_from_current_thread(&self) -> Result<(), SchedulerError> {
        self.shared.check_owner("detach_from_current_thread")?;
        *self.shared.bound_thread.lock() = None;
        self.clear_current();
        debug!("sequence manager detached");
        Ok(())
    }

    fn clear_current(&self) {
        let weak = Arc::downgrade(&self.shared);
        let _ = CURRENT.try_with(|current| {
            let mut current = current.borrow_mut();
            if current.as_ref().is_some_and(|c| Weak::ptr_eq(&c.shared, &weak)) {
                *current = None;
            }
        });
    }

    /// Create a normal-priority queue.
    ///
    /// # Errors
    ///
    /// `InvalidState` when called off the owner thread.
    pub fn create_task_queue(
        &self,
        name: impl Into<String>,
        can_be_throttled: bool,
    ) -> Result<TaskQueue, SchedulerError> {
        self.create_task_queue_with_spec(
            TaskQueueSpec::new(name).with_can_be_throttled(can_be_throttled),
        )
    }

    /// Create a queue from a full spec.
    ///
    /// # Errors
    ///
    /// `InvalidState` when called off the owner thread.
    pub fn create_task_queue_with_spec(
        &self,
        spec: TaskQueueSpec,
    ) -> Result<TaskQueue, SchedulerError> {
        self.shared.check_owner("create_task_queue")?;
        Ok(Self::register_queue(&self.shared, spec))
    }

    /// Runner on the built-in `Control` queue. Control tasks run even while
    /// the scheduler is paused.
    #[must_use]
    pub fn control_task_runner(&self) -> TaskRunner {
        self.control_queue
            .create_task_runner(TaskType::InternalControl)
    }

    /// Runner on the built-in default queue.
    #[must_use]
    pub fn default_task_runner(&self) -> TaskRunner {
        self.default_queue.create_task_runner(self.default_task_type)
    }

    /// Runner whose delayed tasks never wake the thread on their own.
    #[must_use]
    pub fn non_waking_task_runner(&self) -> TaskRunner {
        self.non_waking_queue
            .create_task_runner(self.default_task_type)
    }

    /// Built-in control queue.
    #[must_use]
    pub const fn control_queue(&self) -> &TaskQueue {
        &self.control_queue
    }

    /// Built-in default queue.
    #[must_use]
    pub const fn default_queue(&self) -> &TaskQueue {
        &self.default_queue
    }

    /// Type used by the default and non-waking runners.
    #[must_use]
    pub const fn default_task_type(&self) -> TaskType {
        self.default_task_type
    }

    /// Pause dispatch of every non-`Control` queue until the returned handle
    /// (and every other live handle) is dropped.
    ///
    /// # Errors
    ///
    /// `InvalidState` when called off the owner thread.
    pub fn pause_scheduler(&self) -> Result<PauseHandle, SchedulerError> {
        self.shared.check_owner("pause_scheduler")?;
        let paused = {
            let mut count = self.shared.pause_count.lock();
            *count += 1;
            *count == 1
        };
        if paused {
            info!("scheduler paused");
            notify_observers(&self.shared.observers, |o| {
                o.on_mode_changed(ModeChange::Paused);
            });
        }
        Ok(PauseHandle {
            shared: Arc::downgrade(&self.shared),
            _not_send: PhantomData,
        })
    }

    /// Whether a pause handle is alive.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Change the RAIL mode and notify observers if it differs.
    ///
    /// # Errors
    ///
    /// `InvalidState` when called off the owner thread.
    pub fn set_rail_mode(&self, mode: RailMode) -> Result<(), SchedulerError> {
        self.shared.check_owner("set_rail_mode")?;
        let previous = std::mem::replace(&mut *self.shared.rail_mode.lock(), mode);
        if previous != mode {
            info!(?previous, ?mode, "rail mode changed");
            notify_observers(&self.shared.observers, |o| {
                o.on_mode_changed(ModeChange::RailMode(mode));
            });
        }
        Ok(())
    }

    /// Current RAIL mode.
    #[must_use]
    pub fn rail_mode(&self) -> RailMode {
        *self.shared.rail_mode.lock()
    }

    /// Register an observer without taking ownership of it. Observers are
    /// notified in registration order; one that is dropped without being
    /// removed is skipped.
    ///
    /// # Errors
    ///
    /// `InvalidState` when called off the owner thread.
    pub fn add_task_observer<O>(&self, observer: &Arc<O>) -> Result<ObserverId, SchedulerError>
    where
        O: TaskObserver + 'static,
    {
        self.shared.check_owner("add_task_observer")?;
        let weak: Weak<dyn TaskObserver> = Arc::downgrade(observer) as Weak<dyn TaskObserver>;
        Ok(self.shared.observers.lock().add(weak))
    }

    /// Unregister an observer; returns whether it was registered.
    pub fn remove_task_observer(&self, id: ObserverId) -> bool {
        self.shared.observers.lock().remove(id)
    }

    /// Route `task_type` to `runner` in the lookup table.
    pub fn register_task_type_runner(&self, task_type: TaskType, runner: TaskRunner) {
        self.shared.task_runners.write().insert(task_type, runner);
    }

    /// Runner registered for `task_type`.
    #[must_use]
    pub fn task_runner_for(&self, task_type: TaskType) -> Option<TaskRunner> {
        self.shared.task_runners.read().get(&task_type).cloned()
    }

    /// Shareable view of the task-type lookup table.
    #[must_use]
    pub fn task_runner_table(&self) -> TaskRunnerTable {
        TaskRunnerTable {
            runners: Arc::clone(&self.shared.task_runners),
        }
    }

    /// Thread-safe handle for quitting and observer removal.
    #[must_use]
    pub fn handle(&self) -> SequenceManagerHandle {
        SequenceManagerHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Handle whose [`quit`](SequenceManagerHandle::quit) stops [`run`](Self::run).
    #[must_use]
    pub fn quit_handle(&self) -> QuitHandle {
        self.handle()
    }

    /// Current run-loop phase.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    /// Tasks posted to any live queue and not yet run.
    #[must_use]
    pub fn pending_task_count(&self) -> usize {
        self.shared
            .queue_snapshot()
            .iter()
            .map(|q| q.pending_task_count())
            .sum()
    }

    /// True iff no task from a quiescence-monitored queue ran since the last
    /// call. Clears the record.
    pub fn get_and_clear_system_is_quiescent_bit(&self) -> bool {
        !self.shared.monitored_task_ran.swap(false, Ordering::AcqRel)
    }

    /// Run `callback` after the currently running task completes.
    ///
    /// # Errors
    ///
    /// `InvalidState` if no task is running.
    pub fn add_task_completion_callback<F>(&self, callback: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        push_completion_callback(&self.shared, Box::new(callback))
    }

    /// Select and run one task. Returns `Ok(false)` when nothing is runnable.
    ///
    /// # Errors
    ///
    /// `InvalidState` when called off the owner thread.
    pub fn run_next_task(&self) -> Result<bool, SchedulerError> {
        self.shared.check_owner("run_next_task")?;
        self.shared.set_state(SchedulerState::Selecting);
        let selected = self.select_next_task();
        let ran = match selected {
            Some((queue, priority, task)) => {
                self.run_task(&queue, priority, task);
                true
            }
            None => false,
        };
        self.shared.set_state(SchedulerState::Idle);
        Ok(ran)
    }

    /// Run tasks until nothing is runnable right now.
    ///
    /// # Errors
    ///
    /// `InvalidState` when called off the owner thread.
    pub fn run_until_idle(&self) -> Result<usize, SchedulerError> {
        let mut ran = 0;
        while self.run_next_task()? {
            ran += 1;
        }
        Ok(ran)
    }

    /// Run tasks, blocking while idle, until [`QuitHandle::quit`] is called.
    ///
    /// The thread sleeps until a task is posted, the next waking delayed task
    /// is due, a throttled queue's budget pools allow running again, or the
    /// pause state changes.
    ///
    /// # Errors
    ///
    /// `InvalidState` when called off the owner thread.
    pub fn run(&self) -> Result<(), SchedulerError> {
        self.shared.check_owner("run")?;
        info!("sequence manager run loop started");
        loop {
            {
                let mut wake = self.shared.wake_state.lock();
                if wake.quit {
                    wake.quit = false;
                    break;
                }
                wake.work_available = false;
            }

            if self.run_next_task()? {
                continue;
            }

            let next_wake_up = self.next_wake_up();
            let mut wake = self.shared.wake_state.lock();
            if wake.quit || wake.work_available {
                continue;
            }
            match next_wake_up {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(self.shared.now());
                    if !timeout.is_zero() {
                        self.shared.wake_condvar.wait_for(&mut wake, timeout);
                    }
                }
                None => {
                    while !wake.work_available && !wake.quit {
                        self.shared.wake_condvar.wait(&mut wake);
                    }
                }
            }
        }
        info!("sequence manager run loop stopped");
        Ok(())
    }

    /// Earliest instant some queue needs the thread, if any.
    fn next_wake_up(&self) -> Option<Instant> {
        let now = self.shared.now();
        let paused = self.shared.is_paused();
        self.shared
            .queue_snapshot()
            .iter()
            .filter_map(|q| q.next_wake_up(now, paused))
            .min()
    }

    fn select_next_task(&self) -> Option<(Arc<TaskQueueInner>, QueuePriority, Task)> {
        let now = self.shared.now();
        let paused = self.shared.is_paused();
        let queues = self.shared.queue_snapshot();

        let mut best: Option<(QueuePriority, (Instant, u64), &Arc<TaskQueueInner>)> = None;
        for queue in &queues {
            queue.reload(now);
            let Some((priority, ready_key)) = queue.selection_key(now, paused) else {
                continue;
            };
            let better = best.is_none_or(|(best_priority, best_key, _)| {
                priority > best_priority || (priority == best_priority && ready_key < best_key)
            });
            if better {
                best = Some((priority, ready_key, queue));
            }
        }

        let (priority, _, queue) = best?;
        let task = queue.take_next_task()?;
        Some((Arc::clone(queue), priority, task))
    }

    fn run_task(&self, queue: &TaskQueueInner, priority: QueuePriority, task: Task) {
        let shared = &self.shared;
        let info = TaskInfo::from_task(&task, queue.name(), priority);

        shared.set_state(SchedulerState::Running);
        notify_observers(&shared.observers, |o| o.on_task_started(&info));

        let payload = task.into_payload();
        let start = shared.now();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(payload)) {
            Ok(()) => TaskOutcome::Completed,
            Err(panic) => {
                error!(
                    queue = %info.queue_name,
                    task_id = info.id,
                    task_type = ?info.task_type,
                    panic = panic_message(panic.as_ref()),
                    "task panicked"
                );
                TaskOutcome::Panicked
            }
        };
        let end = shared.now();
        let timing = TaskTiming {
            start,
            end,
            outcome,
        };

        notify_observers(&shared.observers, |o| o.on_task_completed(&info, &timing));
        for pool in queue.budget_pools() {
            pool.record_task_run(queue.id(), start, end);
        }
        if queue.should_monitor_quiescence() {
            shared.monitored_task_ran.store(true, Ordering::Release);
        }

        // The task is over: callbacks may not register further callbacks.
        shared.set_state(SchedulerState::Selecting);
        let callbacks = std::mem::take(&mut *shared.completion_callbacks.lock());
        for callback in callbacks {
            callback();
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl fmt::Debug for SequenceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceManager")
            .field("state", &self.shared.state())
            .field("queues", &self.shared.queues.lock().len())
            .field("observers", &self.shared.observers.lock().len())
            .field("paused", &self.shared.is_paused())
            .finish_non_exhaustive()
    }
}

impl Drop for SequenceManager {
    fn drop(&mut self) {
        for queue in self.shared.queue_snapshot() {
            queue.shutdown();
        }
        self.shared.task_runners.write().clear();
        self.clear_current();
        self.shared.quit();
        debug!("sequence manager destroyed");
    }
}
