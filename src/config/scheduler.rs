//! Scheduler configuration: budget pools, queues and task-type routing.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{CpuTimeBudgetConfig, WakeUpBudgetConfig};
use crate::util::{QueuePriority, TaskType};

/// Environment variable holding the JSON configuration for [`SchedulerConfig::from_env`].
pub const CONFIG_ENV_VAR: &str = "SEQUENCE_MANAGER_CONFIG";

/// Budget pool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BudgetPoolConfig {
    /// Token bucket measured in CPU time.
    CpuTime {
        /// Fraction of wall time refilled as budget, in `0.0..=1.0`.
        cpu_percentage: f64,
        /// Budget available at creation.
        #[serde(default)]
        initial_budget_ms: u64,
        /// Cap on accumulated budget; unbounded when absent.
        #[serde(default)]
        max_budget_level_ms: Option<u64>,
        /// Maximum debt.
        #[serde(default = "default_max_debt_ms")]
        max_debt_ms: u64,
    },
    /// Fixed wake-up windows.
    WakeUp {
        /// Distance between window starts.
        wake_up_interval_ms: u64,
        /// Window length.
        wake_up_duration_ms: u64,
    },
}

const fn default_max_debt_ms() -> u64 {
    1_000
}

impl BudgetPoolConfig {
    /// Validate pool parameters.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::CpuTime {
                cpu_percentage,
                initial_budget_ms,
                max_budget_level_ms,
                ..
            } => {
                if !(0.0..=1.0).contains(cpu_percentage) {
                    return Err("cpu_percentage must be within 0.0..=1.0".into());
                }
                if let Some(max) = max_budget_level_ms {
                    if *max == 0 {
                        return Err("max_budget_level_ms must be greater than 0".into());
                    }
                    if initial_budget_ms > max {
                        return Err("initial_budget_ms must not exceed max_budget_level_ms".into());
                    }
                }
                Ok(())
            }
            Self::WakeUp {
                wake_up_interval_ms,
                wake_up_duration_ms,
            } => {
                if *wake_up_interval_ms == 0 {
                    return Err("wake_up_interval_ms must be greater than 0".into());
                }
                if *wake_up_duration_ms == 0 {
                    return Err("wake_up_duration_ms must be greater than 0".into());
                }
                if wake_up_duration_ms > wake_up_interval_ms {
                    return Err("wake_up_duration_ms must not exceed wake_up_interval_ms".into());
                }
                Ok(())
            }
        }
    }

    /// CPU-time parameters, if this is a `cpu_time` pool.
    #[must_use]
    pub fn cpu_time_config(&self) -> Option<CpuTimeBudgetConfig> {
        match *self {
            Self::CpuTime {
                cpu_percentage,
                initial_budget_ms,
                max_budget_level_ms,
                max_debt_ms,
            } => Some(CpuTimeBudgetConfig {
                cpu_percentage,
                initial_budget: Duration::from_millis(initial_budget_ms),
                max_budget_level: max_budget_level_ms.map(Duration::from_millis),
                max_debt: Duration::from_millis(max_debt_ms),
            }),
            Self::WakeUp { .. } => None,
        }
    }

    /// Wake-up parameters, if this is a `wake_up` pool.
    #[must_use]
    pub const fn wake_up_config(&self) -> Option<WakeUpBudgetConfig> {
        match *self {
            Self::WakeUp {
                wake_up_interval_ms,
                wake_up_duration_ms,
            } => Some(WakeUpBudgetConfig {
                wake_up_interval: Duration::from_millis(wake_up_interval_ms),
                wake_up_duration: Duration::from_millis(wake_up_duration_ms),
            }),
            Self::CpuTime { .. } => None,
        }
    }
}

/// Queue definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Unique queue name.
    pub name: String,
    /// Initial priority.
    #[serde(default)]
    pub priority: QueuePriority,
    /// Whether the queue may be throttled.
    #[serde(default)]
    pub can_be_throttled: bool,
    /// Start with the throttle ref-count at one. Requires `can_be_throttled`.
    #[serde(default)]
    pub throttled: bool,
    /// Names of budget pools to join.
    #[serde(default)]
    pub budget_pools: Vec<String>,
    /// Task types routed to this queue in the runner table.
    #[serde(default)]
    pub task_types: Vec<TaskType>,
    /// Track this queue for quiescence.
    #[serde(default)]
    pub monitor_quiescence: bool,
    /// Delayed tasks never wake the thread.
    #[serde(default)]
    pub non_waking: bool,
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Task type of the default runner.
    #[serde(default)]
    pub default_task_type: TaskType,
    /// Map of budget pool name to definition.
    #[serde(default)]
    pub budget_pools: BTreeMap<String, BudgetPoolConfig>,
    /// Queues, created in order.
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
}

impl QueueConfig {
    /// Validate queue values that do not depend on other entries.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("queue name must not be empty".into());
        }
        if self.throttled && !self.can_be_throttled {
            return Err("throttled requires can_be_throttled".into());
        }
        Ok(())
    }
}

impl SchedulerConfig {
    /// Validate pools, queues and the references between them.
    pub fn validate(&self) -> Result<(), String> {
        for (name, pool) in &self.budget_pools {
            if name.trim().is_empty() {
                return Err("budget pool name must not be empty".into());
            }
            pool.validate()
                .map_err(|e| format!("budget pool `{name}` invalid: {e}"))?;
        }

        let mut names = HashSet::new();
        let mut routed = HashSet::new();
        for queue in &self.queues {
            queue
                .validate()
                .map_err(|e| format!("queue `{}` invalid: {e}", queue.name))?;
            if !names.insert(queue.name.as_str()) {
                return Err(format!("duplicate queue name `{}`", queue.name));
            }
            for pool in &queue.budget_pools {
                if !self.budget_pools.contains_key(pool) {
                    return Err(format!(
                        "queue `{}` references unknown budget pool `{pool}`",
                        queue.name
                    ));
                }
            }
            for task_type in &queue.task_types {
                if !routed.insert(*task_type) {
                    return Err(format!(
                        "task type `{task_type:?}` is routed to more than one queue"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `.env` if present, then parse the JSON in
    /// [`SEQUENCE_MANAGER_CONFIG`](CONFIG_ENV_VAR).
    pub fn from_env() -> Result<Self, String> {
        // A missing .env file is fine; the variable may come from the process.
        let _ = dotenvy::dotenv();
        let raw = std::env::var(CONFIG_ENV_VAR)
            .map_err(|e| format!("{CONFIG_ENV_VAR} not available: {e}"))?;
        Self::from_json_str(&raw)
    }

    /// Queue definition by name.
    #[must_use]
    pub fn queue(&self, name: &str) -> Option<&QueueConfig> {
        self.queues.iter().find(|q| q.name == name)
    }
}
