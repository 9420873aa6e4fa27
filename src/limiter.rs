//! The rate limiter surface.
//!
//! [`RateLimiter`] is what callers program against. Each engine in
//! [`algorithm`](crate::algorithm) implements it for one algorithm;
//! [`Limiter`] picks the engine from a [`RateLimiterConfig`] at runtime.

use std::future::Future;

use crate::algorithm::{FixedWindow, LeakyBucket, TokenBucket};
use crate::config::{RateLimiterConfig, RateLimiterSettings};
use crate::decision::Admission;
use crate::error::Result;
use crate::storage::Storage;

/// An admission controller.
///
/// `evaluate` either admits the call, returning an [`Admission`], or fails
/// with [`RateLimitError::RateLimitExceeded`](crate::RateLimitError::RateLimitExceeded).
/// A rejected call never changes the stored state. Store failures come back
/// as other [`RateLimitError`](crate::RateLimitError) variants.
pub trait RateLimiter: Send + Sync {
    /// Validated parameters of this limiter.
    type Config;

    /// Algorithm name (for logging/metrics).
    fn name(&self) -> &'static str;

    /// The parameters this limiter was built with.
    fn config(&self) -> &Self::Config;

    /// Admit or reject one call for `key`.
    ///
    /// Never waits for capacity: the future resolves as soon as the store
    /// operation completes.
    fn evaluate(&self, key: &str) -> impl Future<Output = Result<Admission>> + Send;

    /// Forget all state for `key`.
    fn reset(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug)]
enum Engine<S> {
    FixedWindow(FixedWindow<S>),
    TokenBucket(TokenBucket<S>),
    LeakyBucket(LeakyBucket<S>),
}

/// A limiter whose algorithm is chosen by configuration.
///
/// # Example
///
/// ```ignore
/// use admission_ratelimit::prelude::*;
///
/// let settings: RateLimiterSettings =
///     serde_json::from_str(r#"{"algorithm": "token_bucket", "bucket_size": 20}"#)?;
/// let limiter = Limiter::from_settings(settings, MemoryStorage::new())?;
///
/// match limiter.evaluate("user:42").await {
///     Ok(admission) => println!("{} left", admission.remaining),
///     Err(e) if e.is_rate_limited() => println!("slow down"),
///     Err(e) => return Err(e.into()),
/// }
/// ```
#[derive(Debug)]
pub struct Limiter<S> {
    config: RateLimiterConfig,
    engine: Engine<S>,
}

impl<S: Storage> Limiter<S> {
    /// Build the engine matching `config` on top of `storage`.
    pub fn new(config: impl Into<RateLimiterConfig>, storage: S) -> Self {
        let config = config.into();
        let engine = match config {
            RateLimiterConfig::FixedWindowCounter(c) => {
                Engine::FixedWindow(FixedWindow::new(c, storage))
            }
            RateLimiterConfig::TokenBucket(c) => Engine::TokenBucket(TokenBucket::new(c, storage)),
            RateLimiterConfig::LeakyBucket(c) => Engine::LeakyBucket(LeakyBucket::new(c, storage)),
        };

        Self { config, engine }
    }

    /// Validate raw settings and build the matching engine.
    pub fn from_settings(settings: RateLimiterSettings, storage: S) -> Result<Self> {
        Ok(Self::new(settings.into_config()?, storage))
    }

    /// The backing store.
    pub fn storage(&self) -> &S {
        match &self.engine {
            Engine::FixedWindow(e) => e.storage(),
            Engine::TokenBucket(e) => e.storage(),
            Engine::LeakyBucket(e) => e.storage(),
        }
    }

    /// The leaky bucket engine, if that is the configured algorithm.
    pub fn as_leaky_bucket(&self) -> Option<&LeakyBucket<S>> {
        match &self.engine {
            Engine::LeakyBucket(e) => Some(e),
            _ => None,
        }
    }

    /// Stop background work. Only the leaky bucket has any.
    pub fn shutdown(&self) {
        if let Engine::LeakyBucket(e) = &self.engine {
            e.shutdown();
        }
    }
}

impl<S: Storage> RateLimiter for Limiter<S> {
    type Config = RateLimiterConfig;

    fn name(&self) -> &'static str {
        self.config.algorithm().name()
    }

    fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    async fn evaluate(&self, key: &str) -> Result<Admission> {
        match &self.engine {
            Engine::FixedWindow(e) => e.evaluate(key).await,
            Engine::TokenBucket(e) => e.evaluate(key).await,
            Engine::LeakyBucket(e) => e.evaluate(key).await,
        }
    }

    async fn reset(&self, key: &str) -> Result<()> {
        match &self.engine {
            Engine::FixedWindow(e) => e.reset(key).await,
            Engine::TokenBucket(e) => e.reset(key).await,
            Engine::LeakyBucket(e) => e.reset(key).await,
        }
    }
}
