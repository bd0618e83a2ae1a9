//! Configuration models for queues, budget pools and task-type routing.

pub mod scheduler;

pub use scheduler::{BudgetPoolConfig, QueueConfig, SchedulerConfig, CONFIG_ENV_VAR};
