//! Rate limiter configuration.
//!
//! Each algorithm has its own immutable config value. Every parameter must be
//! strictly positive; this is checked once, at construction, and a limiter
//! never sees an invalid config afterwards.
//!
//! Values can be built three ways:
//!
//! ```ignore
//! use admission_ratelimit::config::{FixedWindowConfig, RateLimiterSettings};
//! use std::time::Duration;
//!
//! // Explicit parameters
//! let config = FixedWindowConfig::new(Duration::from_millis(500), 2)?;
//!
//! // Defaults table plus overrides
//! let config = FixedWindowConfig::builder().number_of_requests(50).build()?;
//!
//! // Deserialized settings (e.g. from a config file)
//! let settings: RateLimiterSettings = serde_json::from_str(r#"{"algorithm": "token_bucket"}"#)?;
//! let config = settings.into_config()?;
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Values used for any parameter the caller does not set.
pub mod defaults {
    use std::time::Duration;

    /// Fixed window length.
    pub const WINDOW_SIZE: Duration = Duration::from_millis(1_000);
    /// Requests admitted per fixed window.
    pub const NUMBER_OF_REQUESTS: u64 = 10;
    /// Token / leaky bucket capacity.
    pub const BUCKET_SIZE: u64 = 10;
    /// Token bucket full-reset period.
    pub const REFILL_PERIOD: Duration = Duration::from_millis(1_000);
    /// Slots returned to a leaky bucket per outflow tick.
    pub const OUTFLOW_RATE_NUM_REQ: u64 = 10;
    /// Leaky bucket outflow tick period.
    pub const OUTFLOW_RATE_PERIOD: Duration = Duration::from_millis(1_000);
    /// Leaky bucket inactivity threshold.
    pub const CLEAR_QUEUE_AFTER_INACTIVITY: Duration = Duration::from_millis(300_000);
}

/// Algorithm tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Counter reset on discrete windows.
    FixedWindowCounter,
    /// Bucket fully reset after a fixed period.
    TokenBucket,
    /// Bucket drained periodically by a background task.
    LeakyBucket,
}

impl Algorithm {
    /// Name used in logs and outcomes.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FixedWindowCounter => "fixed_window_counter",
            Self::TokenBucket => "token_bucket",
            Self::LeakyBucket => "leaky_bucket",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn positive(name: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidParameter { name });
    }
    Ok(value)
}

// Sub-millisecond periods would truncate to a zero TTL.
fn positive_duration(name: &'static str, value: Duration) -> Result<Duration, ConfigError> {
    if value.as_millis() == 0 {
        return Err(ConfigError::InvalidParameter { name });
    }
    Ok(value)
}

/// Fixed window counter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindowConfig {
    window_size: Duration,
    number_of_requests: u64,
}

impl FixedWindowConfig {
    /// Create a config admitting `number_of_requests` per `window_size`.
    pub fn new(window_size: Duration, number_of_requests: u64) -> Result<Self, ConfigError> {
        Ok(Self {
            window_size: positive_duration("window_size", window_size)?,
            number_of_requests: positive("number_of_requests", number_of_requests)?,
        })
    }

    /// Start from the defaults table.
    pub fn builder() -> FixedWindowConfigBuilder {
        FixedWindowConfigBuilder::default()
    }

    /// Length of one window.
    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    /// Requests admitted per window.
    pub fn number_of_requests(&self) -> u64 {
        self.number_of_requests
    }
}

/// Builder for [`FixedWindowConfig`].
#[derive(Debug, Default)]
pub struct FixedWindowConfigBuilder {
    window_size: Option<Duration>,
    number_of_requests: Option<u64>,
}

impl FixedWindowConfigBuilder {
    /// Set the window length.
    pub fn window_size(mut self, window_size: Duration) -> Self {
        self.window_size = Some(window_size);
        self
    }

    /// Set the number of requests per window.
    pub fn number_of_requests(mut self, n: u64) -> Self {
        self.number_of_requests = Some(n);
        self
    }

    /// Merge with the defaults and validate.
    pub fn build(self) -> Result<FixedWindowConfig, ConfigError> {
        FixedWindowConfig::new(
            self.window_size.unwrap_or(defaults::WINDOW_SIZE),
            self.number_of_requests.unwrap_or(defaults::NUMBER_OF_REQUESTS),
        )
    }
}

/// Token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketConfig {
    bucket_size: u64,
    refill_period: Duration,
}

impl TokenBucketConfig {
    /// Create a config with `bucket_size` tokens, fully restored every `refill_period`.
    pub fn new(bucket_size: u64, refill_period: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            bucket_size: positive("bucket_size", bucket_size)?,
            refill_period: positive_duration("refill_period", refill_period)?,
        })
    }

    /// Start from the defaults table.
    pub fn builder() -> TokenBucketConfigBuilder {
        TokenBucketConfigBuilder::default()
    }

    /// Bucket capacity.
    pub fn bucket_size(&self) -> u64 {
        self.bucket_size
    }

    /// Time from the first request of a period until the bucket is full again.
    pub fn refill_period(&self) -> Duration {
        self.refill_period
    }
}

/// Builder for [`TokenBucketConfig`].
#[derive(Debug, Default)]
pub struct TokenBucketConfigBuilder {
    bucket_size: Option<u64>,
    refill_period: Option<Duration>,
}

impl TokenBucketConfigBuilder {
    /// Set the bucket capacity.
    pub fn bucket_size(mut self, n: u64) -> Self {
        self.bucket_size = Some(n);
        self
    }

    /// Set the refill period.
    pub fn refill_period(mut self, period: Duration) -> Self {
        self.refill_period = Some(period);
        self
    }

    /// Merge with the defaults and validate.
    pub fn build(self) -> Result<TokenBucketConfig, ConfigError> {
        TokenBucketConfig::new(
            self.bucket_size.unwrap_or(defaults::BUCKET_SIZE),
            self.refill_period.unwrap_or(defaults::REFILL_PERIOD),
        )
    }
}

/// Leaky bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakyBucketConfig {
    bucket_size: u64,
    outflow_rate_num_req: u64,
    outflow_rate_period: Duration,
    clear_queue_after_inactivity: Duration,
}

impl LeakyBucketConfig {
    /// Create a config.
    ///
    /// * `bucket_size` - admission slots per key
    /// * `outflow_rate_num_req` - slots returned on each outflow tick
    /// * `outflow_rate_period` - time between outflow ticks
    /// * `clear_queue_after_inactivity` - idle time after which a key's state
    ///   expires and its outflow task stops
    pub fn new(
        bucket_size: u64,
        outflow_rate_num_req: u64,
        outflow_rate_period: Duration,
        clear_queue_after_inactivity: Duration,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            bucket_size: positive("bucket_size", bucket_size)?,
            outflow_rate_num_req: positive("outflow_rate_num_req", outflow_rate_num_req)?,
            outflow_rate_period: positive_duration("outflow_rate_period", outflow_rate_period)?,
            clear_queue_after_inactivity: positive_duration(
                "clear_queue_after_inactivity",
                clear_queue_after_inactivity,
            )?,
        })
    }

    /// Start from the defaults table.
    pub fn builder() -> LeakyBucketConfigBuilder {
        LeakyBucketConfigBuilder::default()
    }

    /// Bucket capacity.
    pub fn bucket_size(&self) -> u64 {
        self.bucket_size
    }

    /// Slots returned per outflow tick.
    pub fn outflow_rate_num_req(&self) -> u64 {
        self.outflow_rate_num_req
    }

    /// Time between outflow ticks.
    pub fn outflow_rate_period(&self) -> Duration {
        self.outflow_rate_period
    }

    /// Inactivity threshold.
    pub fn clear_queue_after_inactivity(&self) -> Duration {
        self.clear_queue_after_inactivity
    }
}

/// Builder for [`LeakyBucketConfig`].
#[derive(Debug, Default)]
pub struct LeakyBucketConfigBuilder {
    bucket_size: Option<u64>,
    outflow_rate_num_req: Option<u64>,
    outflow_rate_period: Option<Duration>,
    clear_queue_after_inactivity: Option<Duration>,
}

impl LeakyBucketConfigBuilder {
    /// Set the bucket capacity.
    pub fn bucket_size(mut self, n: u64) -> Self {
        self.bucket_size = Some(n);
        self
    }

    /// Set the slots returned per tick.
    pub fn outflow_rate_num_req(mut self, n: u64) -> Self {
        self.outflow_rate_num_req = Some(n);
        self
    }

    /// Set the tick period.
    pub fn outflow_rate_period(mut self, period: Duration) -> Self {
        self.outflow_rate_period = Some(period);
        self
    }

    /// Set the inactivity threshold.
    pub fn clear_queue_after_inactivity(mut self, after: Duration) -> Self {
        self.clear_queue_after_inactivity = Some(after);
        self
    }

    /// Merge with the defaults and validate.
    pub fn build(self) -> Result<LeakyBucketConfig, ConfigError> {
        LeakyBucketConfig::new(
            self.bucket_size.unwrap_or(defaults::BUCKET_SIZE),
            self.outflow_rate_num_req.unwrap_or(defaults::OUTFLOW_RATE_NUM_REQ),
            self.outflow_rate_period.unwrap_or(defaults::OUTFLOW_RATE_PERIOD),
            self.clear_queue_after_inactivity
                .unwrap_or(defaults::CLEAR_QUEUE_AFTER_INACTIVITY),
        )
    }
}

/// A validated config for any algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimiterConfig {
    /// Fixed window counter.
    FixedWindowCounter(FixedWindowConfig),
    /// Token bucket.
    TokenBucket(TokenBucketConfig),
    /// Leaky bucket.
    LeakyBucket(LeakyBucketConfig),
}

impl RateLimiterConfig {
    /// The algorithm this config is for.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::FixedWindowCounter(_) => Algorithm::FixedWindowCounter,
            Self::TokenBucket(_) => Algorithm::TokenBucket,
            Self::LeakyBucket(_) => Algorithm::LeakyBucket,
        }
    }
}

impl From<FixedWindowConfig> for RateLimiterConfig {
    fn from(config: FixedWindowConfig) -> Self {
        Self::FixedWindowCounter(config)
    }
}

impl From<TokenBucketConfig> for RateLimiterConfig {
    fn from(config: TokenBucketConfig) -> Self {
        Self::TokenBucket(config)
    }
}

impl From<LeakyBucketConfig> for RateLimiterConfig {
    fn from(config: LeakyBucketConfig) -> Self {
        Self::LeakyBucket(config)
    }
}

/// Raw, deserializable limiter settings.
///
/// Numbers are signed so that a negative value in a settings file is reported
/// as a [`ConfigError`] rather than a parse failure. Parameters that do not
/// belong to the selected algorithm are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterSettings {
    /// Algorithm to run. Required.
    pub algorithm: Option<Algorithm>,
    /// Fixed window length in milliseconds.
    pub window_size_ms: Option<i64>,
    /// Requests admitted per fixed window.
    pub number_of_requests: Option<i64>,
    /// Token or leaky bucket capacity.
    pub bucket_size: Option<i64>,
    /// Token bucket refill period in milliseconds.
    pub refill_period_ms: Option<i64>,
    /// Leaky bucket slots returned per outflow period.
    pub outflow_rate_num_req: Option<i64>,
    /// Leaky bucket outflow period in milliseconds.
    pub outflow_rate_period_ms: Option<i64>,
    /// Idle time in milliseconds after which a leaky bucket key is dropped.
    pub clear_queue_after_inactivity_ms: Option<i64>,
}

impl RateLimiterSettings {
    /// Settings for `algorithm` with every parameter defaulted.
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm: Some(algorithm),
            ..Default::default()
        }
    }

    /// Merge with the defaults table and validate.
    pub fn into_config(self) -> Result<RateLimiterConfig, ConfigError> {
        let algorithm = self
            .algorithm
            .ok_or_else(|| ConfigError::MissingRequired("algorithm".into()))?;

        let config = match algorithm {
            Algorithm::FixedWindowCounter => FixedWindowConfig::new(
                millis("window_size", self.window_size_ms, defaults::WINDOW_SIZE)?,
                count(
                    "number_of_requests",
                    self.number_of_requests,
                    defaults::NUMBER_OF_REQUESTS,
                )?,
            )?
            .into(),
            Algorithm::TokenBucket => TokenBucketConfig::new(
                count("bucket_size", self.bucket_size, defaults::BUCKET_SIZE)?,
                millis("refill_period", self.refill_period_ms, defaults::REFILL_PERIOD)?,
            )?
            .into(),
            Algorithm::LeakyBucket => LeakyBucketConfig::new(
                count("bucket_size", self.bucket_size, defaults::BUCKET_SIZE)?,
                count(
                    "outflow_rate_num_req",
                    self.outflow_rate_num_req,
                    defaults::OUTFLOW_RATE_NUM_REQ,
                )?,
                millis(
                    "outflow_rate_period",
                    self.outflow_rate_period_ms,
                    defaults::OUTFLOW_RATE_PERIOD,
                )?,
                millis(
                    "clear_queue_after_inactivity",
                    self.clear_queue_after_inactivity_ms,
                    defaults::CLEAR_QUEUE_AFTER_INACTIVITY,
                )?,
            )?
            .into(),
        };

        Ok(config)
    }
}

impl TryFrom<RateLimiterSettings> for RateLimiterConfig {
    type Error = ConfigError;

    fn try_from(settings: RateLimiterSettings) -> Result<Self, Self::Error> {
        settings.into_config()
    }
}

fn count(name: &'static str, value: Option<i64>, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => u64::try_from(v)
            .map_err(|_| ConfigError::InvalidParameter { name })
            .and_then(|v| positive(name, v)),
    }
}

fn millis(name: &'static str, value: Option<i64>, default: Duration) -> Result<Duration, ConfigError> {
    count(name, value, default.as_millis() as u64).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_window_config() {
        let config = FixedWindowConfig::new(Duration::from_millis(500), 2).unwrap();
        assert_eq!(config.window_size(), Duration::from_millis(500));
        assert_eq!(config.number_of_requests(), 2);
    }

    #[test]
    fn test_zero_parameters_rejected() {
        assert_eq!(
            FixedWindowConfig::new(Duration::ZERO, 2),
            Err(ConfigError::InvalidParameter { name: "window_size" })
        );
        assert_eq!(
            FixedWindowConfig::new(Duration::from_secs(1), 0),
            Err(ConfigError::InvalidParameter { name: "number_of_requests" })
        );
        assert!(TokenBucketConfig::new(0, Duration::from_secs(1)).is_err());
        assert!(TokenBucketConfig::new(1, Duration::ZERO).is_err());
        assert!(
            LeakyBucketConfig::new(0, 1, Duration::from_secs(1), Duration::from_secs(1)).is_err()
        );
        assert!(
            LeakyBucketConfig::new(1, 0, Duration::from_secs(1), Duration::from_secs(1)).is_err()
        );
        assert!(LeakyBucketConfig::new(1, 1, Duration::ZERO, Duration::from_secs(1)).is_err());
        assert!(LeakyBucketConfig::new(1, 1, Duration::from_secs(1), Duration::ZERO).is_err());
    }

    #[test]
    fn test_sub_millisecond_period_rejected() {
        let result = TokenBucketConfig::new(5, Duration::from_micros(500));
        assert_eq!(
            result,
            Err(ConfigError::InvalidParameter { name: "refill_period" })
        );
    }

    #[test]
    fn test_builders_use_defaults() {
        let config = FixedWindowConfig::builder().build().unwrap();
        assert_eq!(config.window_size(), defaults::WINDOW_SIZE);
        assert_eq!(config.number_of_requests(), defaults::NUMBER_OF_REQUESTS);

        let config = LeakyBucketConfig::builder().bucket_size(3).build().unwrap();
        assert_eq!(config.bucket_size(), 3);
        assert_eq!(config.outflow_rate_num_req(), defaults::OUTFLOW_RATE_NUM_REQ);
        assert_eq!(
            config.clear_queue_after_inactivity(),
            defaults::CLEAR_QUEUE_AFTER_INACTIVITY
        );
    }

    #[test]
    fn test_builder_validates_overrides() {
        let result = TokenBucketConfig::builder().bucket_size(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_into_config() {
        let settings = RateLimiterSettings {
            bucket_size: Some(2),
            refill_period_ms: Some(200),
            ..RateLimiterSettings::new(Algorithm::TokenBucket)
        };

        let config = settings.into_config().unwrap();
        assert_eq!(config.algorithm(), Algorithm::TokenBucket);
        assert_eq!(
            config,
            RateLimiterConfig::TokenBucket(
                TokenBucketConfig::new(2, Duration::from_millis(200)).unwrap()
            )
        );
    }

    #[test]
    fn test_settings_negative_values() {
        let settings = RateLimiterSettings {
            outflow_rate_period_ms: Some(-5),
            ..RateLimiterSettings::new(Algorithm::LeakyBucket)
        };
        assert_eq!(
            settings.into_config(),
            Err(ConfigError::InvalidParameter { name: "outflow_rate_period" })
        );
    }

    #[test]
    fn test_settings_missing_algorithm() {
        let result = RateLimiterSettings::default().into_config();
        assert!(matches!(result, Err(ConfigError::MissingRequired(_))));
    }

    #[test]
    fn test_settings_deserialize() {
        let settings: RateLimiterSettings = serde_json::from_str(
            r#"{"algorithm": "fixed_window_counter", "window_size_ms": 500, "number_of_requests": 2}"#,
        )
        .unwrap();

        let config = RateLimiterConfig::try_from(settings).unwrap();
        let RateLimiterConfig::FixedWindowCounter(config) = config else {
            panic!("expected a fixed window config");
        };
        assert_eq!(config.window_size(), Duration::from_millis(500));
        assert_eq!(config.number_of_requests(), 2);
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(Algorithm::FixedWindowCounter.to_string(), "fixed_window_counter");
        assert_eq!(Algorithm::LeakyBucket.name(), "leaky_bucket");
    }
}
