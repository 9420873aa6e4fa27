//! Redis backend for distributed rate limiting.
//!
//! Uses connection pooling. Locks are `SET NX PX` keys holding a random owner
//! token; only the owner can delete one. Transaction writes are buffered and
//! applied in a single `MULTI`/`EXEC` pipeline on commit.

use std::time::Duration;

use deadpool_redis::{
    redis::{cmd, pipe, AsyncCommands, Script},
    Config, Connection, Pool, PoolConfig, Runtime,
};

use crate::error::{ConnectionError, Result, StorageError};
use crate::storage::{DistributedBackend, StorageEntry, Transaction, TtlPolicy};

const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Redis backend configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
    /// Key prefix for rate limit keys
    pub key_prefix: String,
    /// How long a lock survives if its owner never releases it
    pub lock_lease: Duration,
    /// Pause between attempts to take a busy lock
    pub lock_retry_interval: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: "rl:".to_string(),
            lock_lease: Duration::from_secs(30),
            lock_retry_interval: Duration::from_millis(5),
        }
    }
}

impl RedisConfig {
    /// Create a new Redis configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the pool size.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the lock lease.
    pub fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }

    /// Set the lock retry interval.
    pub fn with_lock_retry_interval(mut self, interval: Duration) -> Self {
        self.lock_retry_interval = interval;
        self
    }
}

/// Redis backend for [`DistributedStorage`](crate::storage::DistributedStorage).
///
/// # Example
///
/// ```ignore
/// use admission_ratelimit::storage::{DistributedStorage, RedisBackend, RedisConfig};
///
/// let config = RedisConfig::new("redis://localhost:6379")
///     .with_prefix("myapp:rl:")
///     .with_pool_size(20);
///
/// let storage = DistributedStorage::new(RedisBackend::new(config).await?);
/// ```
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
    key_prefix: String,
    lock_lease_ms: u64,
    lock_retry_interval: Duration,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("key_prefix", &self.key_prefix)
            .field("lock_lease_ms", &self.lock_lease_ms)
            .finish()
    }
}

impl RedisBackend {
    /// Create a new Redis backend from configuration.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let mut cfg = Config::from_url(&config.url);
        cfg.pool = Some(PoolConfig::new(config.pool_size.max(1)));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        // Test connection
        let mut conn = pool
            .get()
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
        let _: () = cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        tracing::info!(url = %config.url, prefix = %config.key_prefix, "connected to redis");

        Ok(Self {
            pool,
            key_prefix: config.key_prefix,
            lock_lease_ms: (config.lock_lease.as_millis() as u64).max(1),
            lock_retry_interval: config.lock_retry_interval,
        })
    }

    /// Create a new Redis backend from a URL.
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::new(RedisConfig::new(url)).await
    }

    /// Get the full key with prefix.
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn lock_key(&self, name: &str) -> String {
        format!("{}lock:{}", self.key_prefix, name)
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> Result<Connection> {
        get_conn(&self.pool).await
    }
}

async fn get_conn(pool: &Pool) -> Result<Connection> {
    pool.get()
        .await
        .map_err(|_| StorageError::PoolExhausted.into())
}

async fn release(pool: &Pool, lock_key: &str, token: &str) -> Result<()> {
    let mut conn = get_conn(pool).await?;
    let _: i64 = Script::new(UNLOCK_SCRIPT)
        .key(lock_key)
        .arg(token)
        .invoke_async(&mut *conn)
        .await
        .map_err(|e| StorageError::LockFailed(e.to_string()))?;
    Ok(())
}

/// A held Redis lock.
///
/// Dropping it without [`RedisBackend::unlock`] schedules the release on the
/// current tokio runtime; without one, the lease expires it.
pub struct RedisLock {
    pool: Pool,
    lock_key: String,
    token: String,
    released: bool,
}

impl Drop for RedisLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let pool = self.pool.clone();
        let lock_key = std::mem::take(&mut self.lock_key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(err) = release(&pool, &lock_key, &token).await {
                tracing::warn!(lock = %lock_key, error = %err, "failed to release abandoned lock");
            }
        });
    }
}

/// Transaction on one Redis key.
pub struct RedisTransaction {
    conn: Connection,
    key: String,
    staged: Option<(StorageEntry, TtlPolicy)>,
}

impl Transaction for RedisTransaction {
    async fn get(&mut self) -> Result<Option<StorageEntry>> {
        let result: Option<String> = self
            .conn
            .get(&self.key)
            .await
            .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;

        result.as_deref().map(StorageEntry::from_json).transpose().map_err(Into::into)
    }

    fn set(&mut self, entry: StorageEntry, ttl: TtlPolicy) {
        self.staged = Some((entry, ttl));
    }

    async fn commit(mut self) -> Result<()> {
        let Some((entry, ttl)) = self.staged.take() else {
            return Ok(());
        };
        let json = entry.to_json()?;

        let mut pipeline = pipe();
        pipeline.atomic();
        match ttl {
            TtlPolicy::Reset(ttl) => {
                let ttl_ms = (ttl.as_millis() as u64).max(1);
                pipeline.cmd("SET").arg(&self.key).arg(json).arg("PX").arg(ttl_ms).ignore();
            }
            TtlPolicy::Preserve => {
                pipeline.cmd("SET").arg(&self.key).arg(json).arg("KEEPTTL").ignore();
            }
        }

        let _: () = pipeline
            .query_async(&mut *self.conn)
            .await
            .map_err(|e| StorageError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    async fn rollback(self) {}
}

impl DistributedBackend for RedisBackend {
    type Lock = RedisLock;
    type Transaction = RedisTransaction;

    async fn lock(&self, name: &str) -> Result<Self::Lock> {
        let lock_key = self.lock_key(name);
        let token = uuid::Uuid::new_v4().to_string();

        loop {
            let mut conn = self.get_conn().await?;
            let acquired: Option<String> = cmd("SET")
                .arg(&lock_key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(self.lock_lease_ms)
                .query_async(&mut *conn)
                .await
                .map_err(|e| StorageError::LockFailed(e.to_string()))?;
            drop(conn);

            if acquired.is_some() {
                return Ok(RedisLock {
                    pool: self.pool.clone(),
                    lock_key,
                    token,
                    released: false,
                });
            }
            tokio::time::sleep(self.lock_retry_interval).await;
        }
    }

    async fn unlock(&self, mut lock: Self::Lock) -> Result<()> {
        lock.released = true;
        release(&self.pool, &lock.lock_key, &lock.token).await
    }

    async fn begin(&self, key: &str) -> Result<Self::Transaction> {
        Ok(RedisTransaction {
            conn: self.get_conn().await?,
            key: self.full_key(key),
            staged: None,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        conn.del::<_, ()>(self.full_key(key))
            .await
            .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config() {
        let config = RedisConfig::new("redis://localhost:6380")
            .with_prefix("test:")
            .with_pool_size(5)
            .with_lock_lease(Duration::from_secs(5));

        assert_eq!(config.url, "redis://localhost:6380");
        assert_eq!(config.key_prefix, "test:");
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.lock_lease, Duration::from_secs(5));
        assert_eq!(config.lock_retry_interval, Duration::from_millis(5));
    }
}
