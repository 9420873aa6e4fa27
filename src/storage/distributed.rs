//! Distributed storage: named locks plus single-key transactions.
//!
//! [`DistributedStorage`] turns any [`DistributedBackend`] into a [`Storage`].
//! Every `compute` follows the same discipline:
//!
//! 1. acquire the lock named after the sanitized key,
//! 2. begin a transaction on the key and read it,
//! 3. run the transition; stage its write,
//! 4. commit, or roll back if anything failed,
//! 5. release the lock, whatever happened in 2-4.
//!
//! Lock release on drop is the backend's job (see [`DistributedBackend::Lock`]),
//! so a caller that abandons the future mid-flight does not leak a lock.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::Result;
use crate::storage::{current_timestamp_ms, next_expiry, Storage, StorageEntry, TtlPolicy, Write};

/// Derive a lock name from a caller key by keeping only letters and digits.
///
/// `"10.0.0.1"` and `"1000:1"` therefore share a lock, which only serializes
/// more than strictly needed.
///
/// ```ignore
/// assert_eq!(lock_name("10.0.0.1"), "10001");
/// ```
pub fn lock_name(key: &str) -> String {
    key.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// A single-key transaction.
///
/// Reads go to the backend; writes are staged and only become visible on
/// [`commit`](Transaction::commit).
pub trait Transaction: Send {
    /// Read the live value of the key.
    fn get(&mut self) -> impl Future<Output = Result<Option<StorageEntry>>> + Send;

    /// Stage a write.
    fn set(&mut self, entry: StorageEntry, ttl: TtlPolicy);

    /// Apply staged writes atomically. On error nothing was applied.
    fn commit(self) -> impl Future<Output = Result<()>> + Send;

    /// Discard staged writes.
    fn rollback(self) -> impl Future<Output = ()> + Send;
}

/// Capabilities a shared store must offer to host limiter state.
pub trait DistributedBackend: Send + Sync + 'static {
    /// Held lock. Dropping it without [`unlock`](DistributedBackend::unlock)
    /// must still release the lock eventually.
    type Lock: Send;

    /// Transaction handle.
    type Transaction: Transaction;

    /// Acquire the named lock, waiting as long as it is held elsewhere.
    fn lock(&self, name: &str) -> impl Future<Output = Result<Self::Lock>> + Send;

    /// Release a lock acquired with [`lock`](DistributedBackend::lock).
    fn unlock(&self, lock: Self::Lock) -> impl Future<Output = Result<()>> + Send;

    /// Begin a transaction on `key`.
    fn begin(&self, key: &str) -> impl Future<Output = Result<Self::Transaction>> + Send;

    /// Remove `key` outright.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

/// [`Storage`] over a lock + transaction backend.
#[derive(Debug, Clone)]
pub struct DistributedStorage<B> {
    backend: B,
}

impl<B: DistributedBackend> DistributedStorage<B> {
    /// Wrap a backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn transact<F, T>(&self, key: &str, operation: F) -> Result<T>
    where
        F: FnOnce(Option<StorageEntry>) -> Result<(Write, T)> + Send,
        T: Send,
    {
        let mut tx = self.backend.begin(key).await?;

        let current = match tx.get().await {
            Ok(current) => current,
            Err(err) => {
                tx.rollback().await;
                return Err(err);
            }
        };

        match operation(current) {
            Ok((write, result)) => {
                if let Write::Put { entry, ttl } = write {
                    tx.set(entry, ttl);
                }
                if let Err(err) = tx.commit().await {
                    tracing::warn!(key, error = %err, "transaction commit failed");
                    return Err(err);
                }
                Ok(result)
            }
            Err(err) => {
                tx.rollback().await;
                Err(err)
            }
        }
    }
}

impl<B: DistributedBackend> Storage for DistributedStorage<B> {
    async fn compute<F, T>(&self, key: &str, operation: F) -> Result<T>
    where
        F: FnOnce(Option<StorageEntry>) -> Result<(Write, T)> + Send,
        T: Send,
    {
        let lock = self.backend.lock(&lock_name(key)).await?;

        let result = self.transact(key, operation).await;

        if let Err(err) = self.backend.unlock(lock).await {
            // The outcome is already committed or rolled back; the lock lease
            // takes care of the rest.
            tracing::warn!(key, error = %err, "failed to release lock");
        }

        result
    }

    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        let mut tx = self.backend.begin(key).await?;
        let current = tx.get().await;
        tx.rollback().await;
        current
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.backend.delete(key).await
    }
}

/// Transactions between two sweeps of expired slots.
const SWEEP_EVERY: u64 = 10_000;

#[derive(Debug, Clone, Copy)]
struct Slot {
    entry: StorageEntry,
    expires_at: Option<u64>,
}

impl Slot {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct InProcessInner {
    data: DashMap<String, Slot>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    transactions: AtomicU64,
    sweep_lock: parking_lot::Mutex<()>,
}

impl InProcessInner {
    fn purge_expired(&self) -> usize {
        let now = current_timestamp_ms();
        let before = self.data.len();
        self.data.retain(|_, slot| slot.is_live(now));
        before.saturating_sub(self.data.len())
    }
}

/// A [`DistributedBackend`] confined to one process.
///
/// Locks are async mutexes looked up by name and transactions buffer their
/// write until commit, so it follows exactly the same discipline as a remote
/// backend. Cloning shares the underlying state.
///
/// A lock's mutex is forgotten once nobody holds or waits for it. Expired
/// slots are dropped when read, and swept every few thousand transactions.
#[derive(Debug, Clone, Default)]
pub struct InProcessBackend {
    inner: Arc<InProcessInner>,
}

impl InProcessBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, expired ones included.
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    /// Check if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// Whether the named lock is currently held.
    pub fn is_locked(&self, name: &str) -> bool {
        self.inner
            .locks
            .get(name)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Drop every expired slot. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    fn maybe_sweep(&self) {
        let count = self.inner.transactions.fetch_add(1, Ordering::Relaxed);
        if count > 0 && count % SWEEP_EVERY == 0 {
            if let Some(_guard) = self.inner.sweep_lock.try_lock() {
                let removed = self.inner.purge_expired();
                tracing::trace!(removed, "in-process backend sweep");
            }
        }
    }
}

/// Lock held on an [`InProcessBackend`]. Dropping it releases the lock.
#[derive(Debug)]
pub struct InProcessLock {
    inner: Arc<InProcessInner>,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InProcessLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Holders and waiters each keep a clone of the mutex.
        self.inner
            .locks
            .remove_if(&self.name, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Transaction on an [`InProcessBackend`].
#[derive(Debug)]
pub struct InProcessTransaction {
    inner: Arc<InProcessInner>,
    key: String,
    staged: Option<(StorageEntry, TtlPolicy)>,
}

impl Transaction for InProcessTransaction {
    async fn get(&mut self) -> Result<Option<StorageEntry>> {
        let now = current_timestamp_ms();
        if let Some(slot) = self.inner.data.get(&self.key) {
            if slot.is_live(now) {
                return Ok(Some(slot.entry));
            }
            drop(slot);
            self.inner.data.remove_if(&self.key, |_, slot| !slot.is_live(now));
        }
        Ok(None)
    }

    fn set(&mut self, entry: StorageEntry, ttl: TtlPolicy) {
        self.staged = Some((entry, ttl));
    }

    async fn commit(self) -> Result<()> {
        let Some((entry, ttl)) = self.staged else {
            return Ok(());
        };

        let now = current_timestamp_ms();
        let mut slot = self.inner.data.entry(self.key).or_insert(Slot {
            entry,
            expires_at: None,
        });
        let current_expiry = if slot.is_live(now) { slot.expires_at } else { None };
        *slot = Slot {
            entry,
            expires_at: next_expiry(ttl, current_expiry, now),
        };
        Ok(())
    }

    async fn rollback(self) {}
}

impl DistributedBackend for InProcessBackend {
    type Lock = InProcessLock;
    type Transaction = InProcessTransaction;

    async fn lock(&self, name: &str) -> Result<Self::Lock> {
        let mutex = Arc::clone(self.inner.locks.entry(name.to_string()).or_default().value());
        let guard = mutex.lock_owned().await;
        Ok(InProcessLock {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
            guard: Some(guard),
        })
    }

    async fn unlock(&self, lock: Self::Lock) -> Result<()> {
        drop(lock);
        Ok(())
    }

    async fn begin(&self, key: &str) -> Result<Self::Transaction> {
        self.maybe_sweep();
        Ok(InProcessTransaction {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            staged: None,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.data.remove(key);
        Ok(())
    }
}
