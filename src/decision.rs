//! Outcome of an admitted call.
//!
//! A rejected call is not a value of this module: it comes back as
//! [`RateLimitError::RateLimitExceeded`](crate::RateLimitError::RateLimitExceeded).

use serde::Serialize;

/// Proof that a call was admitted, with the capacity left afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    /// Name of the algorithm that admitted the call.
    pub algorithm: &'static str,
    /// Configured capacity (requests per window, or bucket size).
    pub limit: u64,
    /// Calls that can still be admitted right now.
    pub remaining: u64,
}

impl Admission {
    pub(crate) fn new(algorithm: &'static str, limit: u64, remaining: u64) -> Self {
        Self {
            algorithm,
            limit,
            remaining,
        }
    }

    /// Calls admitted so far out of the current capacity.
    pub fn used(&self) -> u64 {
        self.limit.saturating_sub(self.remaining)
    }

    /// Check if this was the last call the current capacity allows.
    pub fn is_last(&self) -> bool {
        self.remaining == 0
    }
}
