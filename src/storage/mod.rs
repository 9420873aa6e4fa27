//! Storage backend trait and implementations.
//!
//! Limiters never read and then write state in two steps. Every transition is
//! handed to the store as one closure through [`Storage::compute`], and the
//! store decides how to make it atomic:
//!
//! - [`MemoryStorage`] runs the closure under the key's map-shard lock.
//! - [`DistributedStorage`] takes a named lock on the sanitized key, runs the
//!   closure inside a transaction, commits or rolls back, and always unlocks.

mod distributed;
mod entry;
#[cfg(feature = "memory")]
mod memory_gc;
#[cfg(feature = "redis")]
mod redis_cluster;

pub use distributed::{
    lock_name, DistributedBackend, DistributedStorage, InProcessBackend, InProcessLock,
    InProcessTransaction, Transaction,
};
pub use entry::StorageEntry;

#[cfg(feature = "memory")]
pub use memory_gc::{GcConfig, GcInterval, MemoryStorage};

#[cfg(feature = "redis")]
pub use redis_cluster::{RedisBackend, RedisConfig, RedisLock, RedisTransaction};

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// How a write treats the entry's expiry clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Expire `ttl` after this write.
    Reset(Duration),
    /// Keep the current expiry. A brand-new entry written this way never expires.
    Preserve,
}

/// The write half of a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    /// Leave the stored state exactly as it was.
    Keep,
    /// Replace the stored state.
    Put {
        /// New state.
        entry: StorageEntry,
        /// Expiry handling for this write.
        ttl: TtlPolicy,
    },
}

impl Write {
    /// Replace the state and restart its expiry clock.
    pub fn reset(entry: StorageEntry, ttl: Duration) -> Self {
        Self::Put {
            entry,
            ttl: TtlPolicy::Reset(ttl),
        }
    }

    /// Replace the state without touching its expiry clock.
    pub fn preserve(entry: StorageEntry) -> Self {
        Self::Put {
            entry,
            ttl: TtlPolicy::Preserve,
        }
    }
}

/// Storage backend trait for rate limiting state.
///
/// Implementations must be thread-safe (`Send + Sync`) and must never let two
/// `compute` calls for the same key interleave. Calls for different keys should
/// not block each other.
pub trait Storage: Send + Sync + 'static {
    /// Atomically read-modify-write the state of `key`.
    ///
    /// `operation` receives the live entry (`None` if absent or expired) and
    /// returns the write to apply plus a result value. If it returns an error,
    /// nothing is written and the error is passed through.
    fn compute<F, T>(&self, key: &str, operation: F) -> impl Future<Output = Result<T>> + Send
    where
        F: FnOnce(Option<StorageEntry>) -> Result<(Write, T)> + Send,
        T: Send;

    /// Get an entry by key.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<StorageEntry>>> + Send;

    /// Delete an entry.
    ///
    /// Returns success even if the key didn't exist.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    async fn compute<F, T>(&self, key: &str, operation: F) -> Result<T>
    where
        F: FnOnce(Option<StorageEntry>) -> Result<(Write, T)> + Send,
        T: Send,
    {
        (**self).compute(key, operation).await
    }

    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    async fn compute<F, T>(&self, key: &str, operation: F) -> Result<T>
    where
        F: FnOnce(Option<StorageEntry>) -> Result<(Write, T)> + Send,
        T: Send,
    {
        (**self).compute(key, operation).await
    }

    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Expiry timestamp after applying `ttl` to an entry whose current expiry is
/// `current` (`None` when the entry is absent or has no expiry).
pub(crate) fn next_expiry(ttl: TtlPolicy, current: Option<u64>, now: u64) -> Option<u64> {
    match ttl {
        TtlPolicy::Reset(ttl) => Some(now.saturating_add(ttl.as_millis() as u64)),
        TtlPolicy::Preserve => current,
    }
}
