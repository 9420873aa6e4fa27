//! Basic admission control walkthrough.
//!
//! Run with:
//! ```
//! RUST_LOG=admission_ratelimit=debug cargo run --example basic
//! ```

use std::time::Duration;

use admission_ratelimit::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Fixed Window: 2 requests per 500ms ===\n");
    let config = FixedWindowConfig::new(Duration::from_millis(500), 2)?;
    let limiter = LocalFixedWindow::new(config, MemoryStorage::new());
    burst(&limiter, "client:1", 3).await?;
    tokio::time::sleep(Duration::from_millis(600)).await;
    println!("  ... 600ms later");
    burst(&limiter, "client:1", 1).await?;

    println!("\n=== Token Bucket: 3 tokens, refilled every 1s ===\n");
    let config = TokenBucketConfig::new(3, Duration::from_secs(1))?;
    let limiter = LocalTokenBucket::new(config, MemoryStorage::new());
    burst(&limiter, "client:1", 4).await?;

    println!("\n=== Leaky Bucket from settings: 2 slots, 1 drained every 300ms ===\n");
    let settings: RateLimiterSettings = serde_json::from_str(
        r#"{
            "algorithm": "leaky_bucket",
            "bucket_size": 2,
            "outflow_rate_num_req": 1,
            "outflow_rate_period_ms": 300
        }"#,
    )?;
    let limiter = Limiter::from_settings(settings, MemoryStorage::new())?;
    burst(&limiter, "client:1", 3).await?;
    tokio::time::sleep(Duration::from_millis(400)).await;
    println!("  ... 400ms later");
    burst(&limiter, "client:1", 2).await?;
    limiter.shutdown();

    Ok(())
}

async fn burst<L: RateLimiter>(limiter: &L, key: &str, requests: usize) -> Result<()> {
    for i in 1..=requests {
        match limiter.evaluate(key).await {
            Ok(admission) => println!(
                "  Request {}: ALLOWED ({}/{} remaining)",
                i, admission.remaining, admission.limit
            ),
            Err(e) if e.is_rate_limited() => println!("  Request {}: DENIED ({})", i, e),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
