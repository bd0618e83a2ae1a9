//! # Prometheus Sequence Manager
//!
//! A per-thread cooperative task scheduler. Many logical task queues (network,
//! user input, rendering, background work) are multiplexed onto a single
//! execution thread; the scheduler enforces queue priorities, throttles queues
//! through shared budget pools, and reports task timing and scheduler mode
//! changes to registered observers.
//!
//! ## Core Concepts
//!
//! - **`SequenceManager`**: owns the task queues of one thread, selects the
//!   next runnable task, runs it and fires completion notifications.
//! - **`TaskQueue`**: a FIFO of pending work with a priority, enabled state and
//!   a throttle reference count.
//! - **`TaskRunner`**: a cloneable, thread-safe posting handle bound to a queue
//!   and a task type.
//! - **`BudgetPool`**: shared throttling policy (`CpuTimeBudgetPool`,
//!   `WakeUpBudgetPool`) consulted for throttled queues.
//! - **`TaskObserver`**: synchronous listener for task start/completion and
//!   pause/resume or RAIL mode changes.
//! - **`PauseHandle`**: scoped token; while one is alive only control tasks run.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_sequence_manager::core::{SequenceManager, TaskQueueSpec};
//! use prometheus_sequence_manager::util::{QueuePriority, SystemClock, TaskType};
//!
//! let manager = SequenceManager::new(Arc::new(SystemClock));
//! manager.attach_to_current_thread()?;
//!
//! let input = manager.create_task_queue_with_spec(
//!     TaskQueueSpec::new("input").with_priority(QueuePriority::Highest),
//! )?;
//! let runner = input.create_task_runner(TaskType::UserInteraction);
//! runner.post_task(|| println!("handled input"))?;
//!
//! manager.run_until_idle()?;
//! ```
//!
//! For dedicated scheduler threads see `runtime::SchedulerThread`, and for
//! building a scheduler from JSON configuration see `builders::build_scheduler`.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: queues, budget pools, observers, manager.
pub mod core;
/// Configuration models for queues and budget pools.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// Thread and async runtime adapters.
pub mod runtime;
/// Shared utilities: clock, value types, telemetry.
pub mod util;
