//! Fixed Window Counter rate limiting algorithm.

use std::time::Duration;

use crate::config::{Algorithm, FixedWindowConfig};
use crate::decision::Admission;
use crate::error::{RateLimitError, Result};
use crate::limiter::RateLimiter;
use crate::storage::{current_timestamp_ms, Storage, StorageEntry, Write};

/// Fixed Window Counter rate limiting algorithm.
///
/// Counts requests in discrete windows that start at the first request seen
/// after the previous window ended. A request exactly `window_size` after the
/// window start still belongs to that window.
///
/// The stored entry expires one millisecond after the window closes, but that
/// is only a memory backstop: the window is judged by its start timestamp, and
/// in-window updates keep the original expiry.
#[derive(Debug, Clone)]
pub struct FixedWindow<S> {
    config: FixedWindowConfig,
    storage: S,
}

impl<S: Storage> FixedWindow<S> {
    /// Create a fixed window limiter over `storage`.
    pub fn new(config: FixedWindowConfig, storage: S) -> Self {
        Self { config, storage }
    }

    /// The backing store.
    pub fn storage(&self) -> &S {
        &self.storage
    }
}

impl<S: Storage> RateLimiter for FixedWindow<S> {
    type Config = FixedWindowConfig;

    fn name(&self) -> &'static str {
        Algorithm::FixedWindowCounter.name()
    }

    fn config(&self) -> &FixedWindowConfig {
        &self.config
    }

    async fn evaluate(&self, key: &str) -> Result<Admission> {
        let name = self.name();
        let limit = self.config.number_of_requests();
        let window_size = self.config.window_size();
        let window_ms = window_size.as_millis() as u64;
        let backstop = window_size + Duration::from_millis(1);

        self.storage
            .compute(key, move |entry| {
                let now = current_timestamp_ms();

                if let Some(entry) = entry {
                    let (window_start, count) = entry.into_window()?;

                    if now.saturating_sub(window_start) <= window_ms {
                        if count.saturating_add(1) > limit {
                            let reopens_at = window_start.saturating_add(window_ms + 1);
                            tracing::debug!(key, count, limit, "fixed window exhausted");
                            return Err(RateLimitError::RateLimitExceeded {
                                algorithm: name,
                                limit,
                                retry_after: Some(Duration::from_millis(
                                    reopens_at.saturating_sub(now),
                                )),
                            });
                        }

                        let count = count + 1;
                        return Ok((
                            Write::preserve(StorageEntry::window(window_start, count)),
                            Admission::new(name, limit, limit - count),
                        ));
                    }
                }

                tracing::debug!(key, window_start = now, "new fixed window");
                Ok((
                    Write::reset(StorageEntry::window(now, 1), backstop),
                    Admission::new(name, limit, limit - 1),
                ))
            })
            .await
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.storage.delete(key).await
    }
}
