//! Task observers and the registration list the manager dispatches over.

use std::sync::Weak;

use parking_lot::Mutex;

use super::task::{TaskInfo, TaskTiming};
use crate::util::RailMode;

/// Scheduler-wide mode transitions reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChange {
    /// The first pause handle was created.
    Paused,
    /// The last pause handle was dropped.
    Resumed,
    /// The RAIL mode changed.
    RailMode(RailMode),
}

/// Listener notified synchronously on the scheduler thread.
///
/// All methods default to no-ops so implementors override only what they need.
pub trait TaskObserver: Send + Sync {
    /// A task is about to run.
    fn on_task_started(&self, _task: &TaskInfo) {}

    /// A task finished, normally or by panicking.
    fn on_task_completed(&self, _task: &TaskInfo, _timing: &TaskTiming) {}

    /// The scheduler changed mode.
    fn on_mode_changed(&self, _change: ModeChange) {}
}

/// Registration token returned by `add_task_observer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered list of non-owning observer registrations.
#[derive(Default)]
pub(crate) struct ObserverList {
    next_id: u64,
    entries: Vec<(ObserverId, Weak<dyn TaskObserver>)>,
}

impl ObserverList {
    pub(crate) fn add(&mut self, observer: Weak<dyn TaskObserver>) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.entries.push((id, observer));
        id
    }

    pub(crate) fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub(crate) fn contains(&self, id: ObserverId) -> bool {
        self.entries.iter().any(|(entry, _)| *entry == id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn snapshot(&mut self) -> Vec<(ObserverId, Weak<dyn TaskObserver>)> {
        // Observers that were dropped without unregistering are forgotten here.
        self.entries.retain(|(_, weak)| weak.strong_count() > 0);
        self.entries.clone()
    }
}

/// Call `f` on every registered observer in registration order.
///
/// Iterates over a snapshot taken without holding the lock during callbacks,
/// so observers may add or remove registrations from inside `f`. An observer
/// removed mid-dispatch is skipped for the rest of that dispatch; one added
/// mid-dispatch is first called on the next dispatch.
pub(crate) fn notify_observers(list: &Mutex<ObserverList>, f: impl Fn(&dyn TaskObserver)) {
    let snapshot = list.lock().snapshot();
    for (id, weak) in snapshot {
        if !list.lock().contains(id) {
            continue;
        }
        if let Some(observer) = weak.upgrade() {
            f(observer.as_ref());
        }
    }
}
