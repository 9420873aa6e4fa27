//! Benchmarks for limiter evaluation.

use std::time::Duration;

use admission_ratelimit::storage::{DistributedStorage, InProcessBackend, MemoryStorage};
use admission_ratelimit::{
    FixedWindow, FixedWindowConfig, LeakyBucket, LeakyBucketConfig, RateLimiter, TokenBucket,
    TokenBucketConfig,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;

// Large enough that the benchmark measures admissions, not rejections.
const HUGE: u64 = u64::MAX / 2;

fn bench_local(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("local");

    group.bench_function("fixed_window", |b| {
        let config = FixedWindowConfig::new(Duration::from_secs(3600), HUGE).unwrap();
        let limiter = FixedWindow::new(config, MemoryStorage::new());
        let limiter = &limiter;
        b.to_async(&rt).iter(|| async move { black_box(limiter.evaluate("bench:key").await) })
    });

    group.bench_function("token_bucket", |b| {
        let config = TokenBucketConfig::new(HUGE, Duration::from_secs(3600)).unwrap();
        let limiter = TokenBucket::new(config, MemoryStorage::new());
        let limiter = &limiter;
        b.to_async(&rt).iter(|| async move { black_box(limiter.evaluate("bench:key").await) })
    });

    group.bench_function("leaky_bucket", |b| {
        let config =
            LeakyBucketConfig::new(HUGE, 1, Duration::from_secs(3600), Duration::from_secs(3600))
                .unwrap();
        let limiter = LeakyBucket::new(config, MemoryStorage::new());
        {
            let limiter = &limiter;
            b.to_async(&rt).iter(|| async move { black_box(limiter.evaluate("bench:key").await) });
        }
        limiter.shutdown();
    });

    group.bench_function("token_bucket_rejected", |b| {
        let config = TokenBucketConfig::new(1, Duration::from_secs(3600)).unwrap();
        let limiter = TokenBucket::new(config, MemoryStorage::new());
        let limiter = &limiter;
        b.to_async(&rt).iter(|| async move { black_box(limiter.evaluate("bench:key").await) })
    });

    group.finish();
}

fn bench_key_spread(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("key_spread");

    for keys in [1u64, 100, 10_000] {
        group.bench_with_input(BenchmarkId::new("token_bucket", keys), &keys, |b, &keys| {
            let config = TokenBucketConfig::new(HUGE, Duration::from_secs(3600)).unwrap();
            let limiter = TokenBucket::new(config, MemoryStorage::new());
            let limiter = &limiter;
            let mut i = 0u64;
            b.to_async(&rt).iter(|| {
                i += 1;
                let key = format!("user:{}", i % keys);
                async move { black_box(limiter.evaluate(&key).await) }
            })
        });
    }

    group.finish();
}

fn bench_distributed(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("distributed_in_process");

    group.bench_function("token_bucket", |b| {
        let config = TokenBucketConfig::new(HUGE, Duration::from_secs(3600)).unwrap();
        let limiter = TokenBucket::new(config, DistributedStorage::new(InProcessBackend::new()));
        let limiter = &limiter;
        b.to_async(&rt).iter(|| async move { black_box(limiter.evaluate("bench:key").await) })
    });

    group.finish();
}

criterion_group!(benches, bench_local, bench_key_spread, bench_distributed);
criterion_main!(benches);
