use std::io::ErrorKind;
use std::path::PathBuf;

use log::{debug, warn};

use super::entry::{decode, encode, CacheEntry};
use super::key::CacheKey;
use crate::errors::MarketDataError;

/// Persistent tier: one JSON envelope per key under `dir`.
///
/// Writes go to a uniquely named temp file that is then renamed over the
/// target, so readers never observe a partial entry.
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Read an entry. Unreadable or foreign-version files are misses.
    pub async fn read(&self, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cache read failed for {}: {}", path.display(), e);
                return None;
            }
        };

        match decode(&bytes) {
            // Guard against md5 collisions and hand-copied files
            Some(entry) if entry.key == *key => Some(entry),
            Some(_) => None,
            None => {
                debug!("Ignoring unreadable cache entry {}", path.display());
                None
            }
        }
    }

    pub async fn write(&self, entry: &CacheEntry) -> Result<(), MarketDataError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| MarketDataError::Cache(format!("{}: {}", self.dir.display(), e)))?;

        let bytes = encode(entry).map_err(|e| MarketDataError::Cache(e.to_string()))?;
        let target = self.path_for(&entry.key);
        let temp = self
            .dir
            .join(format!("{}.{}.tmp", entry.key.file_name(), uuid::Uuid::new_v4()));

        if let Err(e) = tokio::fs::write(&temp, &bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(MarketDataError::Cache(format!("{}: {}", temp.display(), e)));
        }
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(MarketDataError::Cache(format!("{}: {}", target.display(), e)));
        }
        Ok(())
    }

    pub async fn remove(&self, key: &CacheKey) {
        let path = self.path_for(key);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Cache delete failed for {}: {}", path.display(), e);
            }
        }
    }
}
