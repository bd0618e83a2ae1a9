//! Serializable value types shared across the scheduler.

use serde::{Deserialize, Serialize};

/// Unique identifier assigned to every posted task.
pub type TaskId = u64;

/// Unique identifier of a task queue within a sequence manager.
pub type QueueId = u64;

/// Queue priority. Variants are declared lowest first so that the derived
/// ordering ranks `Control` highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QueuePriority {
    /// Runs only when nothing else is runnable.
    BestEffort,
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Work the user is waiting on.
    High,
    /// Input handling and similar latency-critical work.
    Highest,
    /// Scheduler-internal control tasks. Still dispatched while paused.
    Control,
}

impl QueuePriority {
    /// All priorities, highest first.
    pub const ALL: [Self; 6] = [
        Self::Control,
        Self::Highest,
        Self::High,
        Self::Normal,
        Self::Low,
        Self::BestEffort,
    ];
}

/// Tag describing the origin of a task. Used for routing and metrics only;
/// the scheduler places no constraint on which type is posted where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Untyped task.
    #[default]
    Default,
    /// Scheduler-internal control work.
    InternalControl,
    /// Network responses and loading.
    Networking,
    /// Network control messages (cancellation, priority changes).
    NetworkingControl,
    /// Discrete and continuous user input.
    UserInteraction,
    /// DOM mutation follow-up work.
    DomManipulation,
    /// Script timers.
    JavascriptTimer,
    /// Frame production.
    Rendering,
    /// Media element events.
    MediaElementEvent,
    /// Idle-time callbacks.
    IdleTask,
    /// Low priority background work.
    BackgroundWork,
    /// Default type on worker threads.
    WorkerThreadDefault,
}

/// Priority exposed to script through the prioritized task scheduling API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebSchedulingPriority {
    /// Blocks user interaction.
    UserBlocking,
    /// Visible to the user but not blocking.
    UserVisible,
    /// Not visible to the user.
    Background,
}

impl WebSchedulingPriority {
    /// Queue priority used for queues carrying this web priority.
    #[must_use]
    pub const fn queue_priority(self) -> QueuePriority {
        match self {
            Self::UserBlocking => QueuePriority::High,
            Self::UserVisible => QueuePriority::Normal,
            Self::Background => QueuePriority::Low,
        }
    }
}

/// Coarse scheduler-wide performance mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RailMode {
    /// Responding to user input.
    Response,
    /// Animating; the default mode.
    #[default]
    Animation,
    /// Nothing latency sensitive is happening.
    Idle,
    /// Page load in progress.
    Load,
}
