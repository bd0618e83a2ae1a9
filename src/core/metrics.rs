//! Task timing metrics collected through the observer interface.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use super::observer::TaskObserver;
use super::task::{TaskInfo, TaskOutcome, TaskTiming};

const HISTOGRAM_BUCKETS: usize = 64;

/// Log2 histogram of durations in nanoseconds. Bucket `i` counts durations in
/// `[2^i, 2^(i+1))` ns; bucket 0 also holds zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Log2Histogram {
    /// Per-bucket counts.
    pub buckets: Vec<u64>,
}

impl Default for Log2Histogram {
    fn default() -> Self {
        Self {
            buckets: vec![0; HISTOGRAM_BUCKETS],
        }
    }
}

impl Log2Histogram {
    /// Bucket index for `ns`.
    #[must_use]
    pub const fn bucket_for(ns: u64) -> usize {
        if ns == 0 {
            0
        } else {
            63 - ns.leading_zeros() as usize
        }
    }

    /// Count one duration.
    pub fn record(&mut self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.buckets[Self::bucket_for(ns)] += 1;
    }
}

/// Aggregated timings for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueTaskStats {
    /// Tasks completed, including panicked ones.
    pub task_count: u64,
    /// Tasks whose body panicked.
    pub panicked_count: u64,
    /// Sum of run durations in nanoseconds.
    pub total_run_ns: u64,
    /// Longest run in nanoseconds.
    pub max_run_ns: u64,
    /// Sum of queueing times in nanoseconds.
    pub total_queueing_ns: u64,
    /// Run duration distribution.
    pub run_histogram: Log2Histogram,
}

impl QueueTaskStats {
    fn record(&mut self, task: &TaskInfo, timing: &TaskTiming) {
        let run_ns = u64::try_from(timing.duration().as_nanos()).unwrap_or(u64::MAX);
        let queueing_ns =
            u64::try_from(task.queueing_time(timing.start).as_nanos()).unwrap_or(u64::MAX);
        self.task_count += 1;
        if timing.outcome == TaskOutcome::Panicked {
            self.panicked_count += 1;
        }
        self.total_run_ns = self.total_run_ns.saturating_add(run_ns);
        self.max_run_ns = self.max_run_ns.max(run_ns);
        self.total_queueing_ns = self.total_queueing_ns.saturating_add(queueing_ns);
        self.run_histogram.record(timing.duration());
    }

    /// Mean run duration, or zero before the first task.
    #[must_use]
    pub fn mean_run_time(&self) -> Duration {
        if self.task_count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_run_ns / self.task_count)
    }
}

/// Observer aggregating per-queue task timings.
///
/// Register it with `SequenceManager::add_task_observer` and keep the `Arc`
/// alive for as long as metrics should be collected.
#[derive(Debug, Default)]
pub struct TaskTimeMetrics {
    queues: Mutex<BTreeMap<String, QueueTaskStats>>,
}

impl TaskTimeMetrics {
    /// Empty metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the per-queue statistics, keyed by queue name.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, QueueTaskStats> {
        self.queues.lock().clone()
    }

    /// Statistics for one queue.
    #[must_use]
    pub fn queue_stats(&self, queue_name: &str) -> Option<QueueTaskStats> {
        self.queues.lock().get(queue_name).cloned()
    }

    /// Forget everything recorded so far.
    pub fn reset(&self) {
        self.queues.lock().clear();
    }
}

impl TaskObserver for TaskTimeMetrics {
    fn on_task_completed(&self, task: &TaskInfo, timing: &TaskTiming) {
        self.queues
            .lock()
            .entry(task.queue_name.clone())
            .or_default()
            .record(task, timing);
    }
}
