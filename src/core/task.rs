//! Task representation and timing records.

use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, Instant};

use crate::util::{QueueId, QueuePriority, TaskId, TaskType};

/// Boxed task body.
pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// A unit of deferred work. Immutable once posted.
pub struct Task {
    id: TaskId,
    task_type: TaskType,
    queue_id: QueueId,
    enqueue_time: Instant,
    delayed_run_time: Option<Instant>,
    sequence_num: u64,
    payload: TaskFn,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        task_type: TaskType,
        queue_id: QueueId,
        enqueue_time: Instant,
        delayed_run_time: Option<Instant>,
        sequence_num: u64,
        payload: TaskFn,
    ) -> Self {
        Self {
            id,
            task_type,
            queue_id,
            enqueue_time,
            delayed_run_time,
            sequence_num,
            payload,
        }
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Task type tag.
    #[must_use]
    pub const fn task_type(&self) -> TaskType {
        self.task_type
    }

    /// Queue the task was posted to.
    #[must_use]
    pub const fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// When the task was posted.
    #[must_use]
    pub const fn enqueue_time(&self) -> Instant {
        self.enqueue_time
    }

    /// Earliest run time for delayed tasks.
    #[must_use]
    pub const fn delayed_run_time(&self) -> Option<Instant> {
        self.delayed_run_time
    }

    /// Manager-wide posting order.
    #[must_use]
    pub const fn sequence_num(&self) -> u64 {
        self.sequence_num
    }

    /// When the task became runnable: its delayed run time, or the post
    /// time for immediate tasks.
    #[must_use]
    pub fn ready_time(&self) -> Instant {
        self.delayed_run_time.unwrap_or(self.enqueue_time)
    }

    /// Key for cross-queue tie-breaking. Earlier ready time wins, then
    /// posting order.
    #[must_use]
    pub fn ready_key(&self) -> (Instant, u64) {
        (self.ready_time(), self.sequence_num)
    }

    pub(crate) fn into_payload(self) -> TaskFn {
        self.payload
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("task_type", &self.task_type)
            .field("queue_id", &self.queue_id)
            .field("delayed_run_time", &self.delayed_run_time)
            .field("sequence_num", &self.sequence_num)
            .finish_non_exhaustive()
    }
}

/// Wrapper ordering delayed tasks by run time (earliest first) and posting
/// order within the same run time, for use in a max-heap.
pub(crate) struct DelayedTask(pub(crate) Task);

impl DelayedTask {
    pub(crate) fn run_time(&self) -> Instant {
        self.0.ready_time()
    }
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap pops the greatest element.
        other.0.ready_key().cmp(&self.0.ready_key())
    }
}

/// Description of a task handed to observers. The payload itself has been
/// consumed by the time observers see it.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    /// Task identifier.
    pub id: TaskId,
    /// Task type tag.
    pub task_type: TaskType,
    /// Queue the task ran from.
    pub queue_id: QueueId,
    /// Name of that queue.
    pub queue_name: String,
    /// Queue priority at selection time.
    pub priority: QueuePriority,
    /// When the task was posted.
    pub enqueue_time: Instant,
    /// Earliest run time for delayed tasks.
    pub delayed_run_time: Option<Instant>,
    /// Manager-wide posting order.
    pub sequence_num: u64,
}

impl TaskInfo {
    pub(crate) fn from_task(task: &Task, queue_name: &str, priority: QueuePriority) -> Self {
        Self {
            id: task.id,
            task_type: task.task_type,
            queue_id: task.queue_id,
            queue_name: queue_name.to_string(),
            priority,
            enqueue_time: task.enqueue_time,
            delayed_run_time: task.delayed_run_time,
            sequence_num: task.sequence_num,
        }
    }

    /// Time the task spent waiting between becoming runnable and `start`.
    #[must_use]
    pub fn queueing_time(&self, start: Instant) -> Duration {
        let ready = self.delayed_run_time.unwrap_or(self.enqueue_time);
        start.saturating_duration_since(ready)
    }
}

/// How a task body finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Returned normally.
    Completed,
    /// Panicked; the panic was caught by the scheduler.
    Panicked,
}

/// Wall-clock timing of one task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTiming {
    /// When the body started.
    pub start: Instant,
    /// When the body returned.
    pub end: Instant,
    /// How the body finished.
    pub outcome: TaskOutcome,
}

impl TaskTiming {
    /// Run duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }
}
