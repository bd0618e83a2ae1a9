//! Posting with an async reply through a tokio oneshot channel.

use tokio::sync::oneshot;

use crate::core::{SchedulerError, TaskRunner};

impl TaskRunner {
    /// Post `f` and return a receiver resolving to its result.
    ///
    /// The receiver yields `RecvError` if the task never produces a value:
    /// it panicked, or its queue was shut down before it ran.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the queue is shut down or its manager is gone.
    pub fn post_task_and_reply_with_result<F, R>(
        &self,
        f: F,
    ) -> Result<oneshot::Receiver<R>, SchedulerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post_task(move || {
            // The caller may have stopped waiting.
            let _ = reply_tx.send(f());
        })?;
        Ok(reply_rx)
    }
}
