//! Error types for scheduler operations.

use thiserror::Error;

/// Errors produced by scheduler components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Operation on a shut-down queue, a destroyed manager, or a manager not
    /// attached to the calling thread.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// A caller broke a documented contract (e.g. throttle ref-count underflow).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// Removing a queue from a budget pool it never joined.
    #[error("queue `{queue}` is not a member of budget pool `{pool}`")]
    NotAMember {
        /// Queue name.
        queue: String,
        /// Budget pool name.
        pool: String,
    },
    /// Configuration could not be parsed or failed validation.
    #[error("config error: {0}")]
    Config(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
