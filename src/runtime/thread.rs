//! Dedicated OS thread owning a sequence manager.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context};
use tracing::{info, warn};

use crate::core::{
    AppResult, SchedulerError, SequenceManager, SequenceManagerHandle, TaskRunner, TaskRunnerTable,
};
use crate::util::{SystemClock, TaskType};

struct Startup {
    handle: SequenceManagerHandle,
    default_runner: TaskRunner,
    control_runner: TaskRunner,
    runner_table: TaskRunnerTable,
}

/// A named thread running a [`SequenceManager`] until stopped.
///
/// The manager lives entirely on the spawned thread; callers interact with it
/// through runners and the handle. Dropping the `SchedulerThread` quits the
/// run loop and joins the thread.
#[derive(Debug)]
pub struct SchedulerThread {
    name: String,
    handle: SequenceManagerHandle,
    default_runner: TaskRunner,
    control_runner: TaskRunner,
    runner_table: TaskRunnerTable,
    join: Option<JoinHandle<Result<(), SchedulerError>>>,
}

impl SchedulerThread {
    /// Spawn a thread with a manager using `default_task_type` for its default
    /// runner.
    pub fn spawn(name: impl Into<String>, default_task_type: TaskType) -> AppResult<Self> {
        Self::spawn_with(name, default_task_type, |_| Ok(())).map(|(thread, ())| thread)
    }

    /// Spawn a thread and run `setup` on it against the attached manager
    /// before the run loop starts. Whatever `setup` returns is handed back,
    /// typically runners for queues it created.
    pub fn spawn_with<T, F>(
        name: impl Into<String>,
        default_task_type: TaskType,
        setup: F,
    ) -> AppResult<(Self, T)>
    where
        T: Send + 'static,
        F: FnOnce(&SequenceManager) -> Result<T, SchedulerError> + Send + 'static,
    {
        let name = name.into();
        let (startup_tx, startup_rx) = crossbeam_channel::bounded(1);

        let thread_name = name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let manager =
                    SequenceManager::with_default_task_type(Arc::new(SystemClock), default_task_type);
                let started = manager.attach_to_current_thread().and_then(|()| {
                    let value = setup(&manager)?;
                    Ok((
                        Startup {
                            handle: manager.handle(),
                            default_runner: manager.default_task_runner(),
                            control_runner: manager.control_task_runner(),
                            runner_table: manager.task_runner_table(),
                        },
                        value,
                    ))
                });
                let failed = started.as_ref().err().cloned();
                if startup_tx.send(started).is_err() {
                    return Ok(());
                }
                if let Some(err) = failed {
                    return Err(err);
                }
                info!(thread = %thread_name, "scheduler thread running");
                let result = manager.run();
                info!(thread = %thread_name, "scheduler thread stopped");
                result
            })
            .with_context(|| format!("failed to spawn scheduler thread `{name}`"))?;

        let started = startup_rx
            .recv()
            .map_err(|_| anyhow!("scheduler thread `{name}` exited during startup"))?;
        let (startup, value) = match started {
            Ok(started) => started,
            Err(err) => {
                let _ = join.join();
                return Err(anyhow::Error::new(err)
                    .context(format!("scheduler thread `{name}` setup failed")));
            }
        };

        Ok((
            Self {
                name,
                handle: startup.handle,
                default_runner: startup.default_runner,
                control_runner: startup.control_runner,
                runner_table: startup.runner_table,
                join: Some(join),
            },
            value,
        ))
    }

    /// Thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runner on the manager's default queue.
    #[must_use]
    pub fn default_task_runner(&self) -> TaskRunner {
        self.default_runner.clone()
    }

    /// Runner on the manager's control queue.
    #[must_use]
    pub fn control_task_runner(&self) -> TaskRunner {
        self.control_runner.clone()
    }

    /// Task-type lookup table of the manager.
    #[must_use]
    pub fn task_runner_table(&self) -> TaskRunnerTable {
        self.runner_table.clone()
    }

    /// Handle to the manager.
    #[must_use]
    pub fn handle(&self) -> SequenceManagerHandle {
        self.handle.clone()
    }

    /// Quit the run loop and join the thread. Pending tasks are dropped.
    pub fn stop(mut self) -> AppResult<()> {
        self.quit_and_join()
    }

    fn quit_and_join(&mut self) -> AppResult<()> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        self.handle.quit();
        match join.join() {
            Ok(result) => result.with_context(|| format!("scheduler thread `{}` failed", self.name)),
            Err(_) => Err(anyhow!("scheduler thread `{}` panicked", self.name)),
        }
    }
}

impl Drop for SchedulerThread {
    fn drop(&mut self) {
        if let Err(err) = self.quit_and_join() {
            warn!(thread = %self.name, error = %err, "scheduler thread did not stop cleanly");
        }
    }
}
