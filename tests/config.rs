//! Integration tests for configuration and limiter construction.

#![cfg(feature = "memory")]

use std::time::Duration;

use admission_ratelimit::config::defaults;
use admission_ratelimit::{
    Algorithm, ConfigError, FixedWindowConfig, LeakyBucketConfig, Limiter, MemoryStorage,
    RateLimitError, RateLimiter, RateLimiterConfig, RateLimiterSettings, TokenBucketConfig,
};

#[test]
fn test_non_positive_parameters_fail_for_every_algorithm() {
    let bad = [
        (Algorithm::FixedWindowCounter, "window_size_ms"),
        (Algorithm::FixedWindowCounter, "number_of_requests"),
        (Algorithm::TokenBucket, "bucket_size"),
        (Algorithm::TokenBucket, "refill_period_ms"),
        (Algorithm::LeakyBucket, "bucket_size"),
        (Algorithm::LeakyBucket, "outflow_rate_num_req"),
        (Algorithm::LeakyBucket, "outflow_rate_period_ms"),
        (Algorithm::LeakyBucket, "clear_queue_after_inactivity_ms"),
    ];

    for (algorithm, field) in bad {
        for value in [0, -1] {
            let json = format!(r#"{{"algorithm": "{algorithm}", "{field}": {value}}}"#);
            let settings: RateLimiterSettings = serde_json::from_str(&json).unwrap();
            let err = settings.into_config().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidParameter { .. }),
                "{algorithm}.{field} = {value} should be rejected, got {err:?}"
            );
        }
    }
}

#[test]
fn test_defaults_table() {
    let settings = RateLimiterSettings::new(Algorithm::LeakyBucket);
    let RateLimiterConfig::LeakyBucket(config) = settings.into_config().unwrap() else {
        panic!("expected a leaky bucket config");
    };

    assert_eq!(config.bucket_size(), 10);
    assert_eq!(config.outflow_rate_num_req(), 10);
    assert_eq!(config.outflow_rate_period(), Duration::from_millis(1_000));
    assert_eq!(config.clear_queue_after_inactivity(), Duration::from_millis(300_000));
    assert_eq!(config, LeakyBucketConfig::builder().build().unwrap());

    let fixed = FixedWindowConfig::builder().build().unwrap();
    assert_eq!(fixed.window_size(), defaults::WINDOW_SIZE);
    assert_eq!(fixed.number_of_requests(), 10);

    let token = TokenBucketConfig::builder().build().unwrap();
    assert_eq!(token.bucket_size(), defaults::BUCKET_SIZE);
    assert_eq!(token.refill_period(), defaults::REFILL_PERIOD);
}

#[test]
fn test_unknown_algorithm_is_a_parse_error() {
    let result = serde_json::from_str::<RateLimiterSettings>(r#"{"algorithm": "gcra"}"#);
    assert!(result.is_err());
}

#[test]
fn test_missing_algorithm() {
    let settings: RateLimiterSettings = serde_json::from_str(r#"{"bucket_size": 5}"#).unwrap();
    let err = Limiter::from_settings(settings, MemoryStorage::new()).unwrap_err();
    assert!(matches!(
        err,
        RateLimitError::Config(ConfigError::MissingRequired(_))
    ));
}

#[tokio::test]
async fn test_limiter_from_settings_file() {
    let settings: RateLimiterSettings = serde_json::from_str(
        r#"{
            "algorithm": "fixed_window_counter",
            "window_size_ms": 60000,
            "number_of_requests": 2,
            "bucket_size": -3
        }"#,
    )
    .unwrap();

    // Parameters of other algorithms are ignored.
    let limiter = Limiter::from_settings(settings, MemoryStorage::new()).unwrap();
    assert_eq!(limiter.name(), "fixed_window_counter");

    assert_eq!(limiter.evaluate("K").await.unwrap().remaining, 1);
    assert_eq!(limiter.evaluate("K").await.unwrap().remaining, 0);
    assert!(limiter.evaluate("K").await.unwrap_err().is_rate_limited());
}
