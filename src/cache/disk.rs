//! Disk-backed cache: one JSON file per key.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use super::{CacheEntry, CacheProvider};
use crate::error::{Error, Result};

/// Disk cache stores one file per key under `directory`, evicting the
/// oldest-by-mtime entries down to 80% of `max_size_mb` whenever a write
/// pushes the store over budget.
pub struct DiskCache {
    directory: PathBuf,
    max_size_mb: u64,
    // Guards eviction so concurrent writers don't race the size check.
    write_lock: Mutex<()>,
}

impl DiskCache {
    pub async fn new(directory: impl Into<PathBuf>, max_size_mb: u64) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)
            .await
            .map_err(|e| Error::cache(e.to_string()))?;
        Ok(Self {
            directory,
            max_size_mb,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}.json"))
    }

    async fn total_size_bytes(&self) -> Result<u64> {
        let mut total = 0u64;
        let mut read_dir = fs::read_dir(&self.directory)
            .await
            .map_err(|e| Error::cache(e.to_string()))?;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| Error::cache(e.to_string()))?
        {
            if let Ok(meta) = entry.metadata().await {
                total += meta.len();
            }
        }
        Ok(total)
    }

    async fn evict_oldest(&self) -> Result<()> {
        let budget_bytes = self.max_size_mb * 1024 * 1024;
        let target_bytes = (budget_bytes as f64 * 0.8) as u64;

        let mut total = self.total_size_bytes().await?;
        if total <= budget_bytes {
            return Ok(());
        }

        let mut files: Vec<(PathBuf, std::time::SystemTime, u64)> = Vec::new();
        let mut read_dir = fs::read_dir(&self.directory)
            .await
            .map_err(|e| Error::cache(e.to_string()))?;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| Error::cache(e.to_string()))?
        {
            if let Ok(meta) = entry.metadata().await {
                let mtime = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                files.push((entry.path(), mtime, meta.len()));
            }
        }
        files.sort_by_key(|(_, mtime, _)| *mtime);

        for (path, _, size) in files {
            if total <= target_bytes {
                break;
            }
            if fs::remove_file(&path).await.is_ok() {
                total = total.saturating_sub(size);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheProvider for DiskCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(_) => return Ok(None),
        };
        let entry: CacheEntry =
            serde_json::from_str(&raw).map_err(|e| Error::cache(e.to_string()))?;
        if entry.is_expired() {
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(key);
        let raw = serde_json::to_string(&entry)?;
        fs::write(&path, raw)
            .await
            .map_err(|e| Error::cache(e.to_string()))?;
        self.evict_oldest().await
    }

    async fn clear(&self) -> Result<()> {
        let mut read_dir = fs::read_dir(&self.directory)
            .await
            .map_err(|e| Error::cache(e.to_string()))?;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| Error::cache(e.to_string()))?
        {
            let _ = fs::remove_file(entry.path()).await;
        }
        Ok(())
    }

    async fn size_mb(&self) -> Result<f64> {
        Ok(self.total_size_bytes().await? as f64 / (1024.0 * 1024.0))
    }
}

/// Exposed for tests and callers that want to pre-check a cache directory
/// without constructing a [`DiskCache`].
pub fn exists(directory: impl AsRef<Path>) -> bool {
    directory.as_ref().exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neutrosophic::NeutrosophicValue;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path(), 100).await.unwrap();
        let entry = CacheEntry::new(NeutrosophicValue::new(0.7, 0.2, 0.1), "m", 3600);
        cache.set("key1", entry.clone()).await.unwrap();
        let got = cache.get("key1").await.unwrap().unwrap();
        assert_eq!(got.t, entry.t);
    }

    #[tokio::test]
    async fn test_missing_key_returns_none() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path(), 100).await.unwrap();
        assert!(cache.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_removed() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path(), 100).await.unwrap();
        let mut entry = CacheEntry::new(NeutrosophicValue::neutral(), "m", 0);
        entry.timestamp = chrono::Utc::now() - chrono::Duration::seconds(5);
        cache.set("key1", entry).await.unwrap();
        assert!(cache.get("key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path(), 100).await.unwrap();
        cache
            .set("key1", CacheEntry::new(NeutrosophicValue::neutral(), "m", 3600))
            .await
            .unwrap();
        cache.clear().await.unwrap();
        assert!(cache.get("key1").await.unwrap().is_none());
    }
}
