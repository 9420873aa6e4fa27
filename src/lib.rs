//! Admission control for Rust services.
//!
//! `admission_ratelimit` decides, per caller key, whether a request may go
//! through right now:
//!
//! - **Three Algorithms**: Fixed Window Counter, Token Bucket, Leaky Bucket
//! - **Pluggable Storage**: In-memory with GC, or any lock + transaction backend
//! - **Distributed Limits**: Redis backend with connection pooling
//! - **Config Files**: Serde settings merged with a defaults table
//!
//! # Quick Start
//!
//! ```ignore
//! use admission_ratelimit::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = TokenBucketConfig::new(10, Duration::from_secs(1))?;
//!     let limiter = LocalTokenBucket::new(config, MemoryStorage::new());
//!
//!     match limiter.evaluate("user:123").await {
//!         Ok(admission) => println!("Request allowed! {} remaining", admission.remaining),
//!         Err(e) if e.is_rate_limited() => println!("Rate limited!"),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Algorithms
//!
//! | Algorithm | Refill | Config |
//! |-----------|--------|--------|
//! | Fixed Window | new window after `window_size` | [`FixedWindowConfig`] |
//! | Token Bucket | whole bucket `refill_period` after it was created | [`TokenBucketConfig`] |
//! | Leaky Bucket | `outflow_rate_num_req` every `outflow_rate_period` | [`LeakyBucketConfig`] |
//!
//! A rejected call is an error, [`RateLimitError::RateLimitExceeded`], and
//! never changes stored state.
//!
//! # Feature Flags
//!
//! - `memory` (default): In-memory storage with garbage collection
//! - `redis`: Redis storage backend

#![warn(missing_docs)]

pub mod algorithm;
pub mod config;
pub mod decision;
pub mod error;
pub mod limiter;
pub mod storage;

// Re-export main types
pub use config::{
    Algorithm, FixedWindowConfig, LeakyBucketConfig, RateLimiterConfig, RateLimiterSettings,
    TokenBucketConfig,
};
pub use decision::Admission;
pub use error::{ConfigError, ConnectionError, RateLimitError, Result, StorageError};
pub use limiter::{Limiter, RateLimiter};
pub use storage::{lock_name, DistributedStorage, InProcessBackend, Storage, StorageEntry};

// Re-export algorithms
pub use algorithm::{FixedWindow, LeakyBucket, TokenBucket};

// Re-export storage types
#[cfg(feature = "memory")]
pub use storage::{GcConfig, GcInterval, MemoryStorage};

#[cfg(feature = "redis")]
pub use storage::{RedisBackend, RedisConfig};

/// Fixed window counter over the local store.
#[cfg(feature = "memory")]
pub type LocalFixedWindow = FixedWindow<MemoryStorage>;
/// Token bucket over the local store.
#[cfg(feature = "memory")]
pub type LocalTokenBucket = TokenBucket<MemoryStorage>;
/// Leaky bucket over the local store.
#[cfg(feature = "memory")]
pub type LocalLeakyBucket = LeakyBucket<MemoryStorage>;

/// Store shared through Redis.
#[cfg(feature = "redis")]
pub type RedisStorage = DistributedStorage<RedisBackend>;
/// Fixed window counter shared through Redis.
#[cfg(feature = "redis")]
pub type RedisFixedWindow = FixedWindow<RedisStorage>;
/// Token bucket shared through Redis.
#[cfg(feature = "redis")]
pub type RedisTokenBucket = TokenBucket<RedisStorage>;
/// Leaky bucket shared through Redis.
#[cfg(feature = "redis")]
pub type RedisLeakyBucket = LeakyBucket<RedisStorage>;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{
        Algorithm, FixedWindowConfig, LeakyBucketConfig, RateLimiterConfig, RateLimiterSettings,
        TokenBucketConfig,
    };
    pub use crate::decision::Admission;
    pub use crate::error::{RateLimitError, Result};
    pub use crate::limiter::{Limiter, RateLimiter};
    pub use crate::storage::{DistributedStorage, InProcessBackend, Storage};

    pub use crate::algorithm::{FixedWindow, LeakyBucket, TokenBucket};

    #[cfg(feature = "memory")]
    pub use crate::storage::{GcConfig, GcInterval, MemoryStorage};
    #[cfg(feature = "memory")]
    pub use crate::{LocalFixedWindow, LocalLeakyBucket, LocalTokenBucket};

    #[cfg(feature = "redis")]
    pub use crate::storage::{RedisBackend, RedisConfig};
    #[cfg(feature = "redis")]
    pub use crate::{RedisFixedWindow, RedisLeakyBucket, RedisStorage, RedisTokenBucket};
}
