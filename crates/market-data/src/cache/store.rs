use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::sync::Mutex;

use super::disk::DiskCache;
use super::entry::CacheEntry;
use super::key::CacheKey;
use super::memory::MemoryCache;
use crate::config::TtlTable;
use crate::models::Payload;

/// Two-tier cache of provider responses.
///
/// The memory tier is checked first and mirrors what has been read from or
/// written to the persistent tier. Freshness is decided at read time from
/// the category TTL; nothing is swept in the background.
pub struct CacheStore {
    memory: MemoryCache,
    disk: DiskCache,
    ttl: TtlTable,
    stale_retention: Duration,
    /// Per-symbol invalidation instants.
    invalidated: RwLock<HashMap<String, DateTime<Utc>>>,
    /// Serializes writes and retention deletes per key across both tiers.
    write_locks: RwLock<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: TtlTable, stale_retention: Duration) -> Self {
        Self {
            memory: MemoryCache::new(),
            disk: DiskCache::new(dir),
            ttl,
            stale_retention,
            invalidated: RwLock::new(HashMap::new()),
            write_locks: RwLock::new(HashMap::new()),
        }
    }

    fn write_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        {
            let locks = self.write_locks.read().unwrap_or_else(|poisoned| {
                warn!("Cache write lock map was poisoned, recovering");
                poisoned.into_inner()
            });
            if let Some(lock) = locks.get(key) {
                return Arc::clone(lock);
            }
        }

        let mut locks = self.write_locks.write().unwrap_or_else(|poisoned| {
            warn!("Cache write lock map was poisoned, recovering");
            poisoned.into_inner()
        });
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    pub fn ttl(&self) -> &TtlTable {
        &self.ttl
    }

    /// A fresh entry for `key`, if one exists.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.lookup(key).await?;
        if self.is_fresh(&entry, Utc::now()) {
            Some(entry)
        } else {
            debug!("Cache entry {} is not fresh", key);
            None
        }
    }

    /// Any retained entry for `key`, regardless of TTL.
    pub async fn get_stale(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lookup(key).await
    }

    /// Store a response, superseding any previous entry for the key.
    ///
    /// A failed disk write is logged; the memory tier still serves the
    /// entry for the rest of the session.
    pub async fn put(&self, key: CacheKey, source: &str, payload: Payload) -> CacheEntry {
        self.put_entry(CacheEntry::new(key, source, payload)).await
    }

    /// Store a response with an explicit fetch time.
    pub async fn put_with_timestamp(
        &self,
        key: CacheKey,
        source: &str,
        payload: Payload,
        fetched_at: DateTime<Utc>,
    ) -> CacheEntry {
        self.put_entry(CacheEntry {
            key,
            fetched_at,
            source: source.to_string(),
            payload,
        })
        .await
    }

    /// The last put for a key wins in both tiers, whatever its timestamp.
    async fn put_entry(&self, entry: CacheEntry) -> CacheEntry {
        let lock = self.write_lock(&entry.key);
        let _guard = lock.lock().await;

        if let Err(e) = self.disk.write(&entry).await {
            warn!("Failed to persist cache entry {}: {}", entry.key, e);
        }
        self.memory.insert(entry.clone());
        entry
    }

    /// Make every entry for `symbol` fetched up to now non-fresh.
    ///
    /// Entries stay available to [`get_stale`](Self::get_stale).
    pub fn invalidate_symbol(&self, symbol: &str) {
        let mut invalidated = self.invalidated.write().unwrap_or_else(|poisoned| {
            warn!("Cache invalidation lock was poisoned, recovering");
            poisoned.into_inner()
        });
        let now = Utc::now();
        // Past the longest TTL a mark can no longer change a freshness answer
        let horizon = self.ttl.longest();
        invalidated.retain(|_, mark| (now - *mark).to_std().map_or(true, |age| age <= horizon));
        invalidated.insert(symbol.to_string(), now);
    }

    fn invalidated_at(&self, symbol: &str) -> Option<DateTime<Utc>> {
        let invalidated = self.invalidated.read().unwrap_or_else(|poisoned| {
            warn!("Cache invalidation lock was poisoned, recovering");
            poisoned.into_inner()
        });
        invalidated.get(symbol).copied()
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        if entry.age(now) > self.ttl.ttl(entry.key.category) {
            return false;
        }
        match self.invalidated_at(&entry.key.symbol) {
            Some(mark) => entry.fetched_at > mark,
            None => true,
        }
    }

    /// Memory first, then disk. Entries past the retention period are
    /// deleted from both tiers.
    async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = match self.memory.get(key) {
            Some(entry) => entry,
            None => {
                let entry = self.disk.read(key).await?;
                // A put that landed since the disk read takes precedence
                self.memory.insert_if_absent(entry)
            }
        };

        if entry.age(Utc::now()) > self.stale_retention {
            self.drop_expired(key).await;
            return None;
        }

        Some(entry)
    }

    async fn drop_expired(&self, key: &CacheKey) {
        let lock = self.write_lock(key);
        let _guard = lock.lock().await;

        let expired = self
            .memory
            .get(key)
            .map_or(true, |entry| entry.age(Utc::now()) > self.stale_retention);
        if expired {
            debug!("Dropping cache entry {} past retention", key);
            self.memory.remove(key);
            self.disk.remove(key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bar, DataCategory, DataRequest, RawQuote, RawSeries, SeriesSize};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CacheStore {
        CacheStore::new(
            dir.path(),
            TtlTable::default(),
            Duration::from_secs(30 * 24 * 60 * 60),
        )
    }

    fn quote_key(symbol: &str) -> CacheKey {
        CacheKey::for_request(symbol, &DataRequest::Quote)
    }

    fn quote(symbol: &str) -> Payload {
        let mut raw = RawQuote::new(symbol, dec!(150.20), Utc::now());
        raw.volume = Some(dec!(1234567.891));
        Payload::Quote(raw)
    }

    #[tokio::test]
    async fn test_put_then_get_preserves_values() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir);
        let series = Payload::Series(RawSeries::new(
            "AAPL",
            "1d",
            vec![Bar {
                timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
                open: dec!(179.55),
                high: dec!(180.53),
                low: dec!(177.38),
                close: dec!(179.66),
                volume: Some(dec!(73488000)),
            }],
        ));
        let key = CacheKey::for_request("AAPL", &DataRequest::DailySeries(SeriesSize::Compact));

        cache.put(key.clone(), "P1", series.clone()).await;

        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.payload, series);
        assert_eq!(hit.source, "P1");
    }

    #[tokio::test]
    async fn test_persistent_tier_survives_restart() {
        let dir = TempDir::new().unwrap();
        let key = quote_key("MSFT");
        let payload = quote("MSFT");

        store(&dir).put(key.clone(), "P1", payload.clone()).await;

        let reopened = store(&dir);
        let hit = reopened.get(&key).await.unwrap();
        assert_eq!(hit.payload, payload);
    }

    #[tokio::test]
    async fn test_get_never_returns_expired_but_get_stale_does() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir);
        let key = quote_key("AAPL");
        let old = Utc::now() - chrono::Duration::seconds(61);

        cache.put_with_timestamp(key.clone(), "P1", quote("AAPL"), old).await;

        assert!(cache.get(&key).await.is_none());
        let stale = cache.get_stale(&key).await.unwrap();
        assert_eq!(stale.fetched_at, old);
    }

    #[tokio::test]
    async fn test_ttl_is_per_category() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir);
        let two_hours_ago = Utc::now() - chrono::Duration::hours(2);
        let daily = CacheKey::new(DataCategory::Daily, "AAPL", "size=compact");
        let series = Payload::Series(RawSeries::new(
            "AAPL",
            "1d",
            vec![Bar {
                timestamp: Utc::now(),
                open: dec!(1),
                high: dec!(1),
                low: dec!(1),
                close: dec!(1),
                volume: None,
            }],
        ));

        cache.put_with_timestamp(quote_key("AAPL"), "P1", quote("AAPL"), two_hours_ago).await;
        cache.put_with_timestamp(daily.clone(), "P1", series, two_hours_ago).await;

        assert!(cache.get(&quote_key("AAPL")).await.is_none());
        assert!(cache.get(&daily).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_keeps_stale_copy() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir);
        let key = quote_key("AAPL");

        let recent = Utc::now() - chrono::Duration::seconds(1);
        cache
            .put_with_timestamp(key.clone(), "P1", quote("AAPL"), recent)
            .await;
        assert!(cache.get(&key).await.is_some());

        cache.invalidate_symbol("AAPL");
        assert!(cache.get(&key).await.is_none());
        assert!(cache.get_stale(&key).await.is_some());

        // Other symbols are untouched
        cache.put(quote_key("MSFT"), "P1", quote("MSFT")).await;
        assert!(cache.get(&quote_key("MSFT")).await.is_some());
    }

    #[tokio::test]
    async fn test_entries_past_retention_are_deleted() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), TtlTable::default(), Duration::from_secs(3600));
        let key = quote_key("OLD");

        cache
            .put_with_timestamp(
                key.clone(),
                "P1",
                quote("OLD"),
                Utc::now() - chrono::Duration::hours(2),
            )
            .await;

        assert!(cache.get_stale(&key).await.is_none());
        assert!(!dir.path().join(key.file_name()).exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let key = quote_key("AAPL");
        std::fs::write(dir.path().join(key.file_name()), b"{ truncated").unwrap();

        let cache = store(&dir);
        assert!(cache.get_stale(&key).await.is_none());

        // And a later put replaces it
        cache.put(key.clone(), "P1", quote("AAPL")).await;
        assert!(store(&dir).get(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_newer_put_supersedes() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir);
        let key = quote_key("AAPL");

        cache.put(key.clone(), "P1", quote("AAPL")).await;
        let mut newer = RawQuote::new("AAPL", dec!(151.00), Utc::now());
        newer.currency = Some("USD".to_string());
        cache.put(key.clone(), "P1", Payload::Quote(newer.clone())).await;

        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.payload, Payload::Quote(newer.clone()));
        assert_eq!(store(&dir).get(&key).await.unwrap().payload, Payload::Quote(newer));
    }

    #[tokio::test]
    async fn test_older_put_still_supersedes_in_both_tiers() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir);
        let key = quote_key("AAPL");
        let earlier = Utc::now() - chrono::Duration::seconds(5);

        cache.put(key.clone(), "P1", quote("AAPL")).await;
        cache
            .put_with_timestamp(key.clone(), "P2", quote("AAPL"), earlier)
            .await;

        let memory = cache.get_stale(&key).await.unwrap();
        let disk = store(&dir).get_stale(&key).await.unwrap();
        assert_eq!(memory.source, "P2");
        assert_eq!(disk.source, "P2");
        assert_eq!(memory.fetched_at, disk.fetched_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_leave_tiers_in_agreement() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(store(&dir));
        let key = quote_key("AAPL");

        let writers: Vec<_> = (0..16)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                tokio::spawn(async move {
                    let source = format!("P{}", i);
                    let at = Utc::now() - chrono::Duration::seconds(i);
                    cache.put_with_timestamp(key, &source, quote("AAPL"), at).await;
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let memory = cache.get_stale(&key).await.unwrap();
        let disk = store(&dir).get_stale(&key).await.unwrap();
        assert_eq!(memory.source, disk.source);
        assert_eq!(memory.fetched_at, disk.fetched_at);
    }

    #[tokio::test]
    async fn test_old_invalidation_marks_are_pruned() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir);
        let long_ago = Utc::now() - chrono::Duration::days(30);
        cache
            .invalidated
            .write()
            .unwrap()
            .insert("OLD".to_string(), long_ago);

        cache.invalidate_symbol("AAPL");

        let marks = cache.invalidated.read().unwrap();
        assert!(marks.contains_key("AAPL"));
        assert!(!marks.contains_key("OLD"));
    }
}
