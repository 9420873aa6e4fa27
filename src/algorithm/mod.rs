//! Admission algorithms.
//!
//! Each algorithm is a single engine generic over a [`Storage`](crate::storage::Storage):
//! run it on [`MemoryStorage`](crate::storage::MemoryStorage) for one process,
//! or on [`DistributedStorage`](crate::storage::DistributedStorage) to share
//! limits across processes. The transition logic is identical for both.
//!
//! # Available Algorithms
//!
//! | Algorithm | State | Refill | Best For |
//! |-----------|-------|--------|----------|
//! | Fixed Window | window start + count | new window | Simple quotas |
//! | Token Bucket | tokens left | whole bucket when the entry expires | Bursty traffic |
//! | Leaky Bucket | slots left | background outflow per key | Smooth output |

mod fixed_window;
mod leaky_bucket;
mod reclaim;
mod token_bucket;

pub use fixed_window::FixedWindow;
pub use leaky_bucket::LeakyBucket;
pub use token_bucket::TokenBucket;
