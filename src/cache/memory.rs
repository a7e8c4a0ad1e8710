//! In-memory cache backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheProvider};
use crate::error::Result;

/// Rough per-entry size estimate used for the size-capped eviction policy,
/// since an in-memory entry has no filesystem mtime to evict by.
const ESTIMATED_BYTES_PER_ENTRY: u64 = 200;

/// Volatile, process-local cache. Size is capped by entry count using a
/// cheap per-entry size estimate rather than exact measurement.
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    max_size_mb: u64,
}

impl MemoryCache {
    pub fn new(max_size_mb: u64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_size_mb,
        }
    }

    fn max_entries(&self) -> usize {
        let budget_bytes = self.max_size_mb * 1024 * 1024;
        (budget_bytes / ESTIMATED_BYTES_PER_ENTRY).max(1) as usize
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl CacheProvider for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let expired = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_expired() => true,
                Some(entry) => return Ok(Some(entry.clone())),
                None => return Ok(None),
            }
        };
        if expired {
            self.entries.write().await.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), entry);

        let target = ((self.max_entries() as f64) * 0.8) as usize;
        if entries.len() > self.max_entries() {
            let mut by_age: Vec<(String, chrono::DateTime<chrono::Utc>)> = entries
                .iter()
                .map(|(k, v)| (k.clone(), v.timestamp))
                .collect();
            by_age.sort_by_key(|(_, ts)| *ts);
            for (stale_key, _) in by_age.into_iter().take(entries.len().saturating_sub(target)) {
                entries.remove(&stale_key);
            }
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn size_mb(&self) -> Result<f64> {
        let entries = self.entries.read().await;
        Ok((entries.len() as f64 * ESTIMATED_BYTES_PER_ENTRY as f64) / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neutrosophic::NeutrosophicValue;

    #[tokio::test]
    async fn test_round_trip() {
        let cache = MemoryCache::new(100);
        let entry = CacheEntry::new(NeutrosophicValue::new(0.8, 0.1, 0.1), "m", 3600);
        cache.set("k", entry.clone()).await.unwrap();
        let got = cache.get("k").await.unwrap().unwrap();
        assert_eq!(got.t, entry.t);
    }

    #[tokio::test]
    async fn test_expired_entry_removed_on_get() {
        let cache = MemoryCache::new(100);
        let mut entry = CacheEntry::new(NeutrosophicValue::neutral(), "m", 0);
        entry.timestamp = chrono::Utc::now() - chrono::Duration::seconds(5);
        cache.set("k", entry).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
        assert_eq!(cache.entries.read().await.len(), 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = MemoryCache::new(100);
        cache
            .set("k", CacheEntry::new(NeutrosophicValue::neutral(), "m", 3600))
            .await
            .unwrap();
        cache.clear().await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }
}
