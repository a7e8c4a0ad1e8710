//! Content-addressed cache of prior evaluations.

mod disk;
mod memory;

pub use disk::DiskCache;
pub use memory::MemoryCache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::neutrosophic::NeutrosophicValue;

/// Computes the cache key for an evaluation request.
///
/// Exact format: SHA-256 hex digest of `"{layer}|{context}|{prompt}|{model}"`,
/// pipe-joined then hashed.
pub fn cache_key(layer_content: &str, context: &str, evaluation_prompt: &str, model: &str) -> String {
    let joined = format!("{layer_content}|{context}|{evaluation_prompt}|{model}");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A cached evaluation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub t: f64,
    pub i: f64,
    pub f: f64,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl CacheEntry {
    pub fn new(value: NeutrosophicValue, model: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            t: value.t,
            i: value.i,
            f: value.f,
            model: model.into(),
            timestamp: Utc::now(),
            ttl_seconds,
        }
    }

    pub fn value(&self) -> NeutrosophicValue {
        NeutrosophicValue::new(self.t, self.i, self.f)
    }

    pub fn is_expired(&self) -> bool {
        let age = Utc::now().signed_duration_since(self.timestamp);
        age.num_seconds() >= self.ttl_seconds as i64
    }
}

/// Common behavior across cache backends.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Returns the entry for `key` if present and not expired. An expired
    /// entry found during lookup is opportunistically removed.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Stores `entry` under `key`, evicting the oldest entries first if the
    /// store exceeds its configured budget.
    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()>;

    /// Drops all entries.
    async fn clear(&self) -> Result<()>;

    /// Approximate size of the store, in megabytes.
    async fn size_mb(&self) -> Result<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_stable_and_sensitive() {
        let a = cache_key("layer", "ctx", "prompt", "model-x");
        let b = cache_key("layer", "ctx", "prompt", "model-x");
        let c = cache_key("layer", "ctx", "prompt", "model-y");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_cache_entry_expiry() {
        let mut entry = CacheEntry::new(NeutrosophicValue::neutral(), "m", 0);
        entry.timestamp = Utc::now() - chrono::Duration::seconds(1);
        assert!(entry.is_expired());
    }
}
