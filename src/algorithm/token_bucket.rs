//! Token Bucket rate limiting algorithm.

use crate::config::{Algorithm, TokenBucketConfig};
use crate::decision::Admission;
use crate::error::{RateLimitError, Result};
use crate::limiter::RateLimiter;
use crate::storage::{Storage, StorageEntry, Write};

/// Token Bucket rate limiting algorithm.
///
/// A key starts with `bucket_size` tokens and each admitted request takes one.
/// The bucket is refilled all at once: the entry is written with a TTL of
/// `refill_period` when the bucket is created, later decrements keep that
/// expiry, and once it lapses the next request finds no entry and starts a
/// fresh bucket. The refill clock therefore runs from the first request of
/// the period, and a steady trickle of requests cannot postpone it.
#[derive(Debug, Clone)]
pub struct TokenBucket<S> {
    config: TokenBucketConfig,
    storage: S,
}

impl<S: Storage> TokenBucket<S> {
    /// Create a token bucket limiter over `storage`.
    pub fn new(config: TokenBucketConfig, storage: S) -> Self {
        Self { config, storage }
    }

    /// The backing store.
    pub fn storage(&self) -> &S {
        &self.storage
    }
}

impl<S: Storage> RateLimiter for TokenBucket<S> {
    type Config = TokenBucketConfig;

    fn name(&self) -> &'static str {
        Algorithm::TokenBucket.name()
    }

    fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    async fn evaluate(&self, key: &str) -> Result<Admission> {
        let name = self.name();
        let bucket_size = self.config.bucket_size();
        let refill_period = self.config.refill_period();

        self.storage
            .compute(key, move |entry| {
                let Some(entry) = entry else {
                    tracing::debug!(key, bucket_size, "new token bucket");
                    let remaining = bucket_size - 1;
                    return Ok((
                        Write::reset(StorageEntry::bucket(remaining), refill_period),
                        Admission::new(name, bucket_size, remaining),
                    ));
                };

                // Clamp in case the bucket was created under a larger size.
                let tokens = entry.into_bucket()?.min(bucket_size);
                if tokens == 0 {
                    tracing::debug!(key, "token bucket empty");
                    return Err(RateLimitError::exceeded(name, bucket_size));
                }

                let remaining = tokens - 1;
                Ok((
                    Write::preserve(StorageEntry::bucket(remaining)),
                    Admission::new(name, bucket_size, remaining),
                ))
            })
            .await
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.storage.delete(key).await
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::storage::{current_timestamp_ms, DistributedStorage, InProcessBackend, MemoryStorage};
    use std::time::Duration;

    fn config(bucket_size: u64, refill_ms: u64) -> TokenBucketConfig {
        TokenBucketConfig::new(bucket_size, Duration::from_millis(refill_ms)).unwrap()
    }

    #[tokio::test]
    async fn test_token_bucket_basic() {
        let limiter = TokenBucket::new(config(5, 60_000), MemoryStorage::new());

        for i in 1..=5 {
            let admission = limiter.evaluate("user:1").await.unwrap();
            assert_eq!(admission.remaining, 5 - i, "Request {} should be allowed", i);
        }

        let err = limiter.evaluate("user:1").await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_token_bucket_rejection_leaves_state() {
        let limiter = TokenBucket::new(config(1, 60_000), MemoryStorage::new());

        limiter.evaluate("k").await.unwrap();
        for _ in 0..3 {
            assert!(limiter.evaluate("k").await.is_err());
        }
        assert_eq!(limiter.storage().get("k").await.unwrap(), Some(StorageEntry::bucket(0)));
    }

    #[tokio::test]
    async fn test_token_bucket_refill() {
        let limiter = TokenBucket::new(config(2, 200), MemoryStorage::new());

        assert!(limiter.evaluate("k").await.is_ok());
        assert!(limiter.evaluate("k").await.is_ok());
        assert!(limiter.evaluate("k").await.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(limiter.evaluate("k").await.unwrap().remaining, 1);
        assert_eq!(limiter.evaluate("k").await.unwrap().remaining, 0);
        assert!(limiter.evaluate("k").await.is_err());
    }

    #[tokio::test]
    async fn test_token_bucket_refills_exactly_at_refill_period() {
        let limiter = TokenBucket::new(config(2, 200), MemoryStorage::new());

        for _ in 0..20 {
            let created = current_timestamp_ms();
            limiter.evaluate("k").await.unwrap();
            if current_timestamp_ms() != created {
                limiter.reset("k").await.unwrap();
                continue;
            }
            limiter.evaluate("k").await.unwrap();
            assert!(limiter.evaluate("k").await.is_err());

            tokio::time::sleep(Duration::from_millis(190)).await;
            while current_timestamp_ms() < created + 200 {
                std::hint::spin_loop();
            }

            let admission = limiter.evaluate("k").await.unwrap();
            assert_eq!(admission.remaining, 1);
            return;
        }
        panic!("could not create the bucket within a single millisecond");
    }

    #[tokio::test]
    async fn test_token_bucket_trickle_does_not_postpone_refill() {
        let limiter = TokenBucket::new(config(3, 300), MemoryStorage::new());

        // One request every 100ms; the third lands inside the first period.
        assert!(limiter.evaluate("k").await.is_ok());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(limiter.evaluate("k").await.is_ok());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(limiter.evaluate("k").await.unwrap().remaining, 0);

        // 350ms after the first request the bucket is full again, even though
        // the last request was only 150ms ago.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(limiter.evaluate("k").await.unwrap().remaining, 2);
    }

    #[tokio::test]
    async fn test_token_bucket_distributed() {
        let limiter = TokenBucket::new(config(2, 60_000), DistributedStorage::new(InProcessBackend::new()));

        assert_eq!(limiter.evaluate("k").await.unwrap().remaining, 1);
        assert_eq!(limiter.evaluate("k").await.unwrap().remaining, 0);
        assert!(limiter.evaluate("k").await.unwrap_err().is_rate_limited());
    }
}
