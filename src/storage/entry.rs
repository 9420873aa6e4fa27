//! Stored per-key state.

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Per-key state kept by a store.
///
/// Window-based limiters store a [`StorageEntry::Window`], bucket-based ones a
/// [`StorageEntry::Bucket`]. The variant is part of the serialized form, so a
/// key shared between two kinds of limiter is detected instead of misread.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageEntry {
    /// Fixed window counter state.
    Window {
        /// Window start timestamp (Unix milliseconds).
        window_start: u64,
        /// Requests admitted in this window.
        count: u64,
    },
    /// Token / leaky bucket state.
    Bucket {
        /// Admission slots left.
        remaining: u64,
    },
}

impl StorageEntry {
    /// Create a window entry.
    pub fn window(window_start: u64, count: u64) -> Self {
        Self::Window {
            window_start,
            count,
        }
    }

    /// Create a bucket entry.
    pub fn bucket(remaining: u64) -> Self {
        Self::Bucket { remaining }
    }

    /// Read back a window entry, rejecting any other shape.
    pub fn into_window(self) -> Result<(u64, u64), StorageError> {
        match self {
            Self::Window {
                window_start,
                count,
            } => Ok((window_start, count)),
            other => Err(mismatch("window", &other)),
        }
    }

    /// Read back a bucket entry, rejecting any other shape.
    pub fn into_bucket(self) -> Result<u64, StorageError> {
        match self {
            Self::Bucket { remaining } => Ok(remaining),
            other => Err(mismatch("bucket", &other)),
        }
    }

    /// Encode for an external store.
    pub fn to_json(&self) -> Result<String, StorageError> {
        serde_json::to_string(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Decode from an external store.
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        serde_json::from_str(json).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

fn mismatch(expected: &str, found: &StorageEntry) -> StorageError {
    StorageError::Serialization(format!("expected {expected} state, found {found:?}"))
}
