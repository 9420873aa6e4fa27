//! In-memory storage with automatic garbage collection.
//!
//! This storage backend uses `DashMap` for thread-safe concurrent access.
//! Each entry carries an expiry fixed by the write that set it; later writes
//! may restart it or leave it alone, reads never touch it. Expired entries are
//! invisible immediately and physically removed by garbage collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::Result;
use crate::storage::{current_timestamp_ms, next_expiry, Storage, StorageEntry, Write};

/// Garbage collection interval configuration.
#[derive(Debug, Clone)]
pub enum GcInterval {
    /// Run GC every N storage operations.
    Requests(u64),
    /// Run GC at fixed time intervals.
    Duration(Duration),
    /// Disable automatic GC.
    Manual,
}

impl Default for GcInterval {
    fn default() -> Self {
        Self::Requests(10000)
    }
}

/// Garbage collection configuration.
#[derive(Debug, Clone, Default)]
pub struct GcConfig {
    /// When to trigger GC.
    pub interval: GcInterval,
}

impl GcConfig {
    /// Create config with request-based GC.
    pub fn on_requests(count: u64) -> Self {
        Self {
            interval: GcInterval::Requests(count),
        }
    }

    /// Create config with time-based GC.
    pub fn on_duration(interval: Duration) -> Self {
        Self {
            interval: GcInterval::Duration(interval),
        }
    }

    /// Create config with manual GC only.
    pub fn manual() -> Self {
        Self {
            interval: GcInterval::Manual,
        }
    }
}

/// Internal entry with expiration tracking.
#[derive(Debug, Clone)]
struct InternalEntry {
    entry: StorageEntry,
    expires_at: Option<u64>,
}

impl InternalEntry {
    // Gone from the expiry millisecond on.
    fn is_live(&self, now: u64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-memory storage with garbage collection.
///
/// # Example
///
/// ```ignore
/// use admission_ratelimit::storage::{MemoryStorage, GcConfig};
/// use std::time::Duration;
///
/// // Default GC (every 10000 operations)
/// let storage = MemoryStorage::new();
///
/// // Time-based GC, needs a running tokio runtime
/// let storage = MemoryStorage::with_gc(GcConfig::on_duration(Duration::from_secs(60)));
///
/// // Manual GC only
/// let storage = MemoryStorage::with_gc(GcConfig::manual());
/// storage.run_gc();
/// ```
pub struct MemoryStorage {
    data: Arc<DashMap<String, InternalEntry>>,
    gc_config: GcConfig,
    request_count: AtomicU64,
    gc_lock: Mutex<()>,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entries", &self.data.len())
            .field("gc_config", &self.gc_config)
            .finish()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create a new memory storage with default GC configuration.
    pub fn new() -> Self {
        Self::with_gc(GcConfig::default())
    }

    /// Create a new memory storage with custom GC configuration.
    pub fn with_gc(gc_config: GcConfig) -> Self {
        let storage = Self {
            data: Arc::new(DashMap::new()),
            gc_config: gc_config.clone(),
            request_count: AtomicU64::new(0),
            gc_lock: Mutex::new(()),
            shutdown: Arc::new(Notify::new()),
        };

        if let GcInterval::Duration(interval) = gc_config.interval {
            storage.start_gc_task(interval);
        }

        storage
    }

    /// Start background GC task.
    fn start_gc_task(&self, interval: Duration) {
        let data = Arc::clone(&self.data);
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let removed = run_gc_on_map(&data);
                        tracing::trace!(removed, "memory storage gc pass");
                    }
                    _ = shutdown.notified() => {
                        break;
                    }
                }
            }
        });
    }

    /// Manually trigger garbage collection. Returns the number of entries removed.
    pub fn run_gc(&self) -> usize {
        run_gc_on_map(&self.data)
    }

    /// Get the number of entries currently stored, expired ones included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.data.clear();
    }

    /// Check if GC should run and run it if needed.
    ///
    /// Must not be called while holding a reference into the map.
    fn maybe_run_gc(&self) {
        if let GcInterval::Requests(threshold) = self.gc_config.interval {
            let count = self.request_count.fetch_add(1, Ordering::Relaxed);
            if threshold > 0 && count % threshold == 0 && count > 0 {
                if let Some(_guard) = self.gc_lock.try_lock() {
                    run_gc_on_map(&self.data);
                }
            }
        }
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

/// Drop every expired entry.
fn run_gc_on_map(data: &DashMap<String, InternalEntry>) -> usize {
    let now = current_timestamp_ms();
    let before = data.len();
    data.retain(|_, entry| entry.is_live(now));
    before.saturating_sub(data.len())
}

impl Storage for MemoryStorage {
    async fn compute<F, T>(&self, key: &str, operation: F) -> Result<T>
    where
        F: FnOnce(Option<StorageEntry>) -> Result<(Write, T)> + Send,
        T: Send,
    {
        self.maybe_run_gc();

        let now = current_timestamp_ms();

        // The entry guard holds the shard lock for the whole transition.
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let live = occupied.get().is_live(now);
                let current = live.then(|| occupied.get().entry);
                let current_expiry = if live { occupied.get().expires_at } else { None };

                let (write, result) = operation(current)?;

                if let Write::Put { entry, ttl } = write {
                    occupied.insert(InternalEntry {
                        entry,
                        expires_at: next_expiry(ttl, current_expiry, now),
                    });
                }
                Ok(result)
            }
            Entry::Vacant(vacant) => {
                let (write, result) = operation(None)?;

                if let Write::Put { entry, ttl } = write {
                    vacant.insert(InternalEntry {
                        entry,
                        expires_at: next_expiry(ttl, None, now),
                    });
                }
                Ok(result)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        self.maybe_run_gc();

        let now = current_timestamp_ms();
        if let Some(internal) = self.data.get(key) {
            if internal.is_live(now) {
                return Ok(Some(internal.entry));
            }
            // Entry expired, remove it
            drop(internal);
            self.data.remove_if(key, |_, entry| !entry.is_live(now));
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RateLimitError;
    use crate::storage::TtlPolicy;

    async fn put(storage: &MemoryStorage, key: &str, write: Write) {
        storage
            .compute(key, |_| Ok((write, ())))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_memory_storage_basic() {
        let storage = MemoryStorage::new();

        let entry = StorageEntry::bucket(5);
        put(&storage, "key1", Write::reset(entry, Duration::from_secs(60))).await;

        let result = storage.get("key1").await.unwrap();
        assert_eq!(result, Some(entry));
    }

    #[tokio::test]
    async fn test_memory_storage_expiration() {
        let storage = MemoryStorage::new();

        let entry = StorageEntry::bucket(5);
        put(&storage, "key1", Write::reset(entry, Duration::from_millis(10))).await;

        // Wait for expiration
        tokio::time::sleep(Duration::from_millis(30)).await;

        let result = storage.get("key1").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_preserve_keeps_original_expiry() {
        let storage = MemoryStorage::new();

        put(&storage, "key1", Write::reset(StorageEntry::bucket(3), Duration::from_millis(100))).await;

        // Keep updating without renewing the expiry.
        for remaining in (0..3).rev() {
            tokio::time::sleep(Duration::from_millis(20)).await;
            put(&storage, "key1", Write::preserve(StorageEntry::bucket(remaining))).await;
        }

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(storage.get("key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_restarts_expiry() {
        let storage = MemoryStorage::new();

        put(&storage, "key1", Write::reset(StorageEntry::bucket(3), Duration::from_millis(80))).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        put(&storage, "key1", Write::reset(StorageEntry::bucket(2), Duration::from_millis(80))).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(storage.get("key1").await.unwrap(), Some(StorageEntry::bucket(2)));
    }

    #[tokio::test]
    async fn test_compute_sees_expired_entry_as_absent() {
        let storage = MemoryStorage::new();
        put(&storage, "key1", Write::reset(StorageEntry::bucket(1), Duration::from_millis(5))).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let seen = storage.compute("key1", |current| Ok((Write::Keep, current))).await.unwrap();
        assert!(seen.is_none());
    }

    #[tokio::test]
    async fn test_compute_error_writes_nothing() {
        let storage = MemoryStorage::new();
        put(&storage, "key1", Write::reset(StorageEntry::bucket(1), Duration::from_secs(60))).await;

        let result: Result<()> = storage
            .compute("key1", |_| Err(RateLimitError::exceeded("test", 1)))
            .await;
        assert!(result.unwrap_err().is_rate_limited());
        assert_eq!(storage.get("key1").await.unwrap(), Some(StorageEntry::bucket(1)));

        let result: Result<()> = storage
            .compute("key2", |_| Err(RateLimitError::exceeded("test", 1)))
            .await;
        assert!(result.is_err());
        assert!(storage.get("key2").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_compute_is_atomic_across_tasks() {
        let storage = Arc::new(MemoryStorage::new());
        let mut handles = Vec::new();

        for _ in 0..64 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                storage
                    .compute("counter", |current| {
                        let next = current.map(|e| e.into_bucket().unwrap()).unwrap_or(0) + 1;
                        Ok((
                            Write::Put {
                                entry: StorageEntry::bucket(next),
                                ttl: TtlPolicy::Preserve,
                            },
                            (),
                        ))
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(storage.get("counter").await.unwrap(), Some(StorageEntry::bucket(64)));
    }

    #[tokio::test]
    async fn test_run_gc_removes_expired() {
        let storage = MemoryStorage::with_gc(GcConfig::manual());
        put(&storage, "short", Write::reset(StorageEntry::bucket(1), Duration::from_millis(5))).await;
        put(&storage, "long", Write::reset(StorageEntry::bucket(1), Duration::from_secs(60))).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(storage.run_gc(), 1);
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_duration_gc_task() {
        let storage = MemoryStorage::with_gc(GcConfig::on_duration(Duration::from_millis(20)));
        put(&storage, "short", Write::reset(StorageEntry::bucket(1), Duration::from_millis(5))).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let storage = MemoryStorage::new();
        put(&storage, "key1", Write::reset(StorageEntry::bucket(1), Duration::from_secs(60))).await;
        storage.delete("key1").await.unwrap();
        assert!(storage.get("key1").await.unwrap().is_none());
    }

    #[test]
    fn test_entry_expires_at_its_expiry_millisecond() {
        let entry = InternalEntry {
            entry: StorageEntry::bucket(1),
            expires_at: Some(1_000),
        };
        assert!(entry.is_live(999));
        assert!(!entry.is_live(1_000));
        assert!(!entry.is_live(1_001));

        let forever = InternalEntry {
            entry: StorageEntry::bucket(1),
            expires_at: None,
        };
        assert!(forever.is_live(u64::MAX));
    }

    #[test]
    fn test_gc_config() {
        let config = GcConfig::on_requests(1000);
        assert!(matches!(config.interval, GcInterval::Requests(1000)));
        assert!(matches!(GcConfig::manual().interval, GcInterval::Manual));
    }
}
