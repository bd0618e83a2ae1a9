//! Core scheduling abstractions: tasks, queues, budget pools, observers and
//! the sequence manager that ties them together.

pub mod budget_pool;
pub mod error;
pub mod metrics;
pub mod observer;
pub mod sequence_manager;
pub mod task;
pub mod task_queue;

pub use budget_pool::{
    BudgetPool, BudgetPoolId, CpuTimeBudgetConfig, CpuTimeBudgetPool, WakeUpBudgetConfig,
    WakeUpBudgetPool,
};
pub use error::{AppResult, SchedulerError};
pub use metrics::{Log2Histogram, QueueTaskStats, TaskTimeMetrics};
pub use observer::{ModeChange, ObserverId, TaskObserver};
pub use sequence_manager::{
    add_task_completion_callback, current_handle, current_task_runner, PauseHandle, QuitHandle,
    SchedulerState, SequenceManager, SequenceManagerHandle, TaskRunnerTable, CONTROL_QUEUE_NAME,
    DEFAULT_QUEUE_NAME, NON_WAKING_QUEUE_NAME,
};
pub use task::{TaskFn, TaskInfo, TaskOutcome, TaskTiming};
pub use task_queue::{QueueEnabledVoter, TaskQueue, TaskQueueSpec, TaskRunner};
