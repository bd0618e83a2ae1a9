//! Builder constructing a sequence manager, its budget pools and queues from
//! configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::config::{BudgetPoolConfig, SchedulerConfig};
use crate::core::{
    BudgetPool, CpuTimeBudgetPool, SchedulerError, SequenceManager, TaskQueue, TaskQueueSpec,
    WakeUpBudgetPool,
};
use crate::util::Clock;

/// Everything [`build_scheduler`] created.
#[derive(Debug)]
pub struct BuiltScheduler {
    /// The manager, attached to the building thread.
    pub manager: SequenceManager,
    /// Configured queues by name.
    pub queues: BTreeMap<String, TaskQueue>,
    /// Configured budget pools by name.
    pub budget_pools: BTreeMap<String, Arc<dyn BudgetPool>>,
}

impl BuiltScheduler {
    /// Configured queue by name.
    #[must_use]
    pub fn queue(&self, name: &str) -> Option<&TaskQueue> {
        self.queues.get(name)
    }

    /// Configured budget pool by name.
    #[must_use]
    pub fn budget_pool(&self, name: &str) -> Option<&Arc<dyn BudgetPool>> {
        self.budget_pools.get(name)
    }
}

fn build_budget_pool(
    name: &str,
    cfg: &BudgetPoolConfig,
    clock: &dyn Clock,
) -> Result<Arc<dyn BudgetPool>, SchedulerError> {
    let now = clock.now();
    if let Some(config) = cfg.cpu_time_config() {
        return Ok(Arc::new(CpuTimeBudgetPool::new(name, config, now)));
    }
    if let Some(config) = cfg.wake_up_config() {
        return Ok(Arc::new(WakeUpBudgetPool::new(name, config, now)));
    }
    Err(SchedulerError::Config(format!(
        "budget pool `{name}` has no usable parameters"
    )))
}

/// Build a scheduler from configuration and attach it to the calling thread.
///
/// Queues are created in configuration order, join their pools, start
/// throttled when asked to, and are registered in the task-type runner table
/// for each of their task types.
///
/// # Errors
///
/// `Config` if the configuration is invalid; `InvalidState` if another manager
/// is already attached to the calling thread.
pub fn build_scheduler(
    cfg: &SchedulerConfig,
    clock: Arc<dyn Clock>,
) -> Result<BuiltScheduler, SchedulerError> {
    cfg.validate()
        .map_err(|e| SchedulerError::Config(format!("config invalid: {e}")))?;

    let mut budget_pools = BTreeMap::new();
    for (name, pool_cfg) in &cfg.budget_pools {
        let pool = build_budget_pool(name, pool_cfg, clock.as_ref())?;
        budget_pools.insert(name.clone(), pool);
    }

    let manager = SequenceManager::with_default_task_type(Arc::clone(&clock), cfg.default_task_type);
    manager.attach_to_current_thread()?;

    let mut queues = BTreeMap::new();
    for queue_cfg in &cfg.queues {
        let spec = TaskQueueSpec::new(queue_cfg.name.clone())
            .with_priority(queue_cfg.priority)
            .with_can_be_throttled(queue_cfg.can_be_throttled)
            .with_should_monitor_quiescence(queue_cfg.monitor_quiescence)
            .with_non_waking(queue_cfg.non_waking);
        let queue = manager.create_task_queue_with_spec(spec)?;

        for pool_name in &queue_cfg.budget_pools {
            let pool = budget_pools.get(pool_name).ok_or_else(|| {
                SchedulerError::Config(format!("unknown budget pool `{pool_name}`"))
            })?;
            queue.add_to_budget_pool(clock.now(), Arc::clone(pool))?;
        }
        if queue_cfg.throttled {
            queue.increase_throttle_ref_count();
        }
        for task_type in &queue_cfg.task_types {
            manager.register_task_type_runner(*task_type, queue.create_task_runner(*task_type));
        }
        queues.insert(queue_cfg.name.clone(), queue);
    }

    info!(
        queues = queues.len(),
        budget_pools = budget_pools.len(),
        "scheduler built from config"
    );
    Ok(BuiltScheduler {
        manager,
        queues,
        budget_pools,
    })
}
