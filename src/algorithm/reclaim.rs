//! Per-key reclamation tasks for the leaky bucket.
//!
//! A [`Reclaimers`] registry holds at most one [`ReclaimTask`] per key. Tasks
//! are registered and removed from inside the store's atomic compute for that
//! key, so a request never sees a task that has already decided to exit.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Registry record for a running task.
#[derive(Debug)]
pub(crate) struct ReclaimTask {
    id: u64,
    /// Last refill, or registration time (Unix milliseconds).
    last_activity: u64,
    handle: AbortHandle,
}

/// Concurrent key to task registry.
#[derive(Debug, Default)]
pub(crate) struct Reclaimers {
    tasks: DashMap<String, ReclaimTask>,
    next_id: AtomicU64,
}

impl Reclaimers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.tasks.contains_key(key)
    }

    /// Start a task for `key` unless one is already registered.
    ///
    /// `spawn` receives the new task's id. Returns `true` if a task was started.
    pub(crate) fn register_with<F>(&self, key: &str, now: u64, spawn: F) -> bool
    where
        F: FnOnce(u64) -> AbortHandle,
    {
        match self.tasks.entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                vacant.insert(ReclaimTask {
                    id,
                    last_activity: now,
                    handle: spawn(id),
                });
                true
            }
        }
    }

    /// Last activity of `key`'s task, if task `id` still owns the key.
    pub(crate) fn last_activity(&self, key: &str, id: u64) -> Option<u64> {
        self.tasks
            .get(key)
            .filter(|task| task.id == id)
            .map(|task| task.last_activity)
    }

    pub(crate) fn touch(&self, key: &str, id: u64, now: u64) {
        if let Some(mut task) = self.tasks.get_mut(key)
            && task.id == id
        {
            task.last_activity = now;
        }
    }

    /// Remove `key`'s record if it belongs to task `id`.
    pub(crate) fn release(&self, key: &str, id: u64) -> bool {
        self.tasks.remove_if(key, |_, task| task.id == id).is_some()
    }

    /// Abort and forget every task.
    pub(crate) fn abort_all(&self) {
        self.tasks.retain(|_, task| {
            task.handle.abort();
            false
        });
    }
}

/// Run `tick` every `period`, the first time one period from now, until it
/// returns [`ControlFlow::Break`] or the task is aborted.
pub(crate) fn spawn_periodic<F, Fut>(period: Duration, mut tick: F) -> AbortHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ControlFlow<()>> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if tick().await.is_break() {
                break;
            }
        }
    });
    task.abort_handle()
}
