//! Leaky Bucket rate limiting algorithm.
//!
//! The bucket holds the admission slots left for a key. Requests take slots;
//! a background task per key gives `outflow_rate_num_req` of them back every
//! `outflow_rate_period`, and stops once the key is gone or has sat full and
//! idle for `clear_queue_after_inactivity`.

use std::ops::ControlFlow;
use std::sync::Arc;

use crate::algorithm::reclaim::{spawn_periodic, Reclaimers};
use crate::config::{Algorithm, LeakyBucketConfig};
use crate::decision::Admission;
use crate::error::{RateLimitError, Result};
use crate::limiter::RateLimiter;
use crate::storage::{current_timestamp_ms, Storage, StorageEntry, Write};

struct Shared<S> {
    config: LeakyBucketConfig,
    storage: S,
    reclaimers: Reclaimers,
}

impl<S> Drop for Shared<S> {
    fn drop(&mut self) {
        self.reclaimers.abort_all();
    }
}

/// Leaky Bucket rate limiting algorithm.
///
/// Every write, whether from a request or from outflow, restarts the entry's
/// inactivity TTL, so abandoned keys disappear from the store on their own.
///
/// Reclamation tasks run on the tokio runtime that called
/// [`evaluate`](RateLimiter::evaluate). They only hold a weak reference to the
/// limiter; dropping the last clone of it, or calling
/// [`shutdown`](LeakyBucket::shutdown), stops them all.
///
/// With a [`DistributedStorage`](crate::storage::DistributedStorage), each
/// process drains the keys it has admitted requests for. Outflow ticks use the
/// same lock and transaction as requests, so they never interleave on a key.
pub struct LeakyBucket<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for LeakyBucket<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for LeakyBucket<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeakyBucket")
            .field("config", &self.shared.config)
            .field("storage", &self.shared.storage)
            .field("active_reclaimers", &self.shared.reclaimers.len())
            .finish()
    }
}

impl<S: Storage> LeakyBucket<S> {
    /// Create a leaky bucket limiter over `storage`.
    pub fn new(config: LeakyBucketConfig, storage: S) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                storage,
                reclaimers: Reclaimers::new(),
            }),
        }
    }

    /// The backing store.
    pub fn storage(&self) -> &S {
        &self.shared.storage
    }

    /// Number of keys with a running reclamation task.
    pub fn active_reclaimers(&self) -> usize {
        self.shared.reclaimers.len()
    }

    /// Whether `key` has a running reclamation task.
    pub fn is_reclaiming(&self, key: &str) -> bool {
        self.shared.reclaimers.contains(key)
    }

    /// Stop every reclamation task.
    ///
    /// Stored state is left as it is. A later admitted request starts a new
    /// task for its key.
    pub fn shutdown(&self) {
        let active = self.shared.reclaimers.len();
        self.shared.reclaimers.abort_all();
        tracing::debug!(active, "leaky bucket reclaimers stopped");
    }

    /// Start the key's task unless one is running. Called under the key's
    /// store lock.
    fn start_reclaimer(&self, key: &str) {
        let period = self.shared.config.outflow_rate_period();

        let started = self.shared.reclaimers.register_with(key, current_timestamp_ms(), |id| {
            let shared = Arc::downgrade(&self.shared);
            let key = key.to_string();

            spawn_periodic(period, move || {
                let shared = shared.clone();
                let key = key.clone();
                async move {
                    let Some(shared) = shared.upgrade() else {
                        tracing::trace!(key, "leaky bucket dropped, reclaimer exiting");
                        return ControlFlow::Break(());
                    };
                    shared.reclaim(&key, id).await
                }
            })
        });

        if started {
            tracing::trace!(key, "reclaimer started");
        }
    }
}

impl<S: Storage> Shared<S> {
    /// One outflow tick for `key`, run by task `id`.
    async fn reclaim(&self, key: &str, id: u64) -> ControlFlow<()> {
        let bucket_size = self.config.bucket_size();
        let outflow = self.config.outflow_rate_num_req();
        let idle_after = self.config.clear_queue_after_inactivity();
        let idle_after_ms = idle_after.as_millis() as u64;

        let result = self
            .storage
            .compute(key, |entry| {
                let Some(last_activity) = self.reclaimers.last_activity(key, id) else {
                    // Replaced or shut down.
                    return Ok((Write::Keep, Tick::Stop));
                };

                let Some(entry) = entry else {
                    self.reclaimers.release(key, id);
                    tracing::trace!(key, "leaky bucket state gone, reclaimer exiting");
                    return Ok((Write::Keep, Tick::Stop));
                };

                let Ok(slots) = entry.into_bucket() else {
                    self.reclaimers.release(key, id);
                    tracing::warn!(key, ?entry, "key holds non-bucket state, reclaimer exiting");
                    return Ok((Write::Keep, Tick::Stop));
                };

                let now = current_timestamp_ms();
                if slots < bucket_size {
                    let slots = slots.saturating_add(outflow).min(bucket_size);
                    tracing::trace!(key, slots, "leaky bucket outflow");
                    return Ok((
                        Write::reset(StorageEntry::bucket(slots), idle_after),
                        Tick::Refilled(now),
                    ));
                }

                if now.saturating_sub(last_activity) >= idle_after_ms {
                    self.reclaimers.release(key, id);
                    tracing::debug!(key, "leaky bucket idle, reclaimer exiting");
                    return Ok((Write::Keep, Tick::Stop));
                }

                Ok((Write::Keep, Tick::Idle))
            })
            .await;

        match result {
            Ok(Tick::Refilled(at)) => {
                // Only a committed refill counts as activity.
                self.reclaimers.touch(key, id, at);
                ControlFlow::Continue(())
            }
            Ok(Tick::Idle) => ControlFlow::Continue(()),
            Ok(Tick::Stop) => ControlFlow::Break(()),
            Err(err) => {
                tracing::warn!(key, error = %err, "leaky bucket outflow failed, retrying next tick");
                ControlFlow::Continue(())
            }
        }
    }
}

/// Outcome of one outflow tick.
enum Tick {
    /// Slots were returned at the given time.
    Refilled(u64),
    /// Full, but not idle for long enough yet.
    Idle,
    /// The task is done with this key.
    Stop,
}

impl<S: Storage> RateLimiter for LeakyBucket<S> {
    type Config = LeakyBucketConfig;

    fn name(&self) -> &'static str {
        Algorithm::LeakyBucket.name()
    }

    fn config(&self) -> &LeakyBucketConfig {
        &self.shared.config
    }

    async fn evaluate(&self, key: &str) -> Result<Admission> {
        let name = self.name();
        let bucket_size = self.shared.config.bucket_size();
        let idle_after = self.shared.config.clear_queue_after_inactivity();

        self.shared
            .storage
            .compute(key, |entry| {
                let remaining = match entry {
                    None => {
                        tracing::debug!(key, bucket_size, "new leaky bucket");
                        bucket_size - 1
                    }
                    Some(entry) => {
                        let slots = entry.into_bucket()?.min(bucket_size);
                        if slots == 0 {
                            tracing::debug!(key, "leaky bucket full");
                            return Err(RateLimitError::exceeded(name, bucket_size));
                        }
                        slots - 1
                    }
                };

                self.start_reclaimer(key);

                Ok((
                    Write::reset(StorageEntry::bucket(remaining), idle_after),
                    Admission::new(name, bucket_size, remaining),
                ))
            })
            .await
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.shared.storage.delete(key).await
    }
}
