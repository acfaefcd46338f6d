// src/cache.rs
use crate::store::{CacheStore, StoredEntry};
use chrono::Utc;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Coarse data categories. Each one carries its own freshness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataCategory {
    StockData,
    HistoricalData,
    MarketData,
    News,
    Ipo,
}

impl DataCategory {
    pub fn default_ttl(&self) -> Duration {
        match self {
            DataCategory::StockData => Duration::from_secs(60),
            DataCategory::HistoricalData => Duration::from_secs(60 * 60),
            DataCategory::MarketData => Duration::from_secs(5 * 60),
            DataCategory::News => Duration::from_secs(15 * 60),
            DataCategory::Ipo => Duration::from_secs(60 * 60),
        }
    }
}

/// Builds `endpoint?k1=v1&k2=v2` with parameters sorted by name so the same
/// request always lands on the same entry.
pub fn cache_key(endpoint: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return endpoint.to_string();
    }
    let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
    sorted.sort();
    let query = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", endpoint, query)
}

struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

#[derive(Debug, Clone, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    store_hits: u64,
    inserts: u64,
    evictions: u64,
    expirations: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub store_hits: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
    pub hit_rate: f64,
    pub store: Option<&'static str>,
}

/// Shared TTL cache for upstream responses.
///
/// The memory tier is bounded by `max_entries`: expired entries are swept
/// first, then the oldest insertion is evicted. An optional [`CacheStore`]
/// backs it with a persistent tier; failures there are logged and otherwise
/// ignored.
pub struct CacheService {
    entries: RwLock<HashMap<String, CacheEntry>>,
    counters: Mutex<Counters>,
    max_entries: usize,
    store: Option<Arc<dyn CacheStore>>,
}

impl CacheService {
    pub fn new(max_entries: usize) -> Self {
        CacheService {
            entries: RwLock::new(HashMap::new()),
            counters: Mutex::new(Counters::default()),
            max_entries: max_entries.max(1),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Memory-tier lookup. Expired entries are dropped and count as misses.
    ///
    /// Hits only take the read lock; the write lock is taken to remove an
    /// entry found expired.
    pub fn get(&self, key: &str) -> Option<Value> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => {
                    self.counters.lock().hits += 1;
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.counters.lock().misses += 1;
                    return None;
                }
            }
        }

        let mut entries = self.entries.write();
        let mut counters = self.counters.lock();
        // Another writer may have refreshed or removed it in between.
        match entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                counters.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => {
                entries.remove(key);
                counters.expirations += 1;
            }
            None => {}
        }
        counters.misses += 1;
        None
    }

    /// Like [`get`](Self::get) but leaves the counters alone.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.entries
            .read()
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        let mut entries = self.entries.write();
        let mut counters = self.counters.lock();

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired());
            counters.expirations += (before - entries.len()) as u64;

            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    debug!("Evicting cache entry {}", oldest);
                    entries.remove(&oldest);
                    counters.evictions += 1;
                }
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
        counters.inserts += 1;
    }

    /// Memory first, then the persistent tier. A fresh persistent hit is
    /// copied back into memory for whatever TTL it has left.
    pub async fn read_through(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.get(key) {
            return Some(value);
        }
        let store = self.store.as_ref()?;

        match store.load(key).await {
            Ok(Some(entry)) => {
                let remaining = entry.remaining(Utc::now())?;
                debug!(
                    "Cache {} hit for {} ({}s left)",
                    store.name(),
                    key,
                    remaining.as_secs()
                );
                self.set(key, entry.payload.clone(), remaining);
                self.counters.lock().store_hits += 1;
                Some(entry.payload)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cache {} lookup for {} failed: {}", store.name(), key, e);
                None
            }
        }
    }

    pub async fn write_through(&self, key: &str, value: Value, ttl: Duration) {
        let Some(store) = self.store.as_ref() else {
            self.set(key, value, ttl);
            return;
        };

        let entry = StoredEntry {
            payload: value,
            fetched_at: Utc::now(),
            ttl,
        };
        if let Err(e) = store.save(key, &entry).await {
            warn!("Cache {} write for {} failed: {}", store.name(), key, e);
        }
        self.set(key, entry.payload, ttl);
    }

    /// Drops every expired entry and returns how many went.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let purged = before - entries.len();
        self.counters.lock().expirations += purged as u64;
        purged
    }

    /// Empties both tiers. Returns how many memory entries were dropped.
    pub async fn clear(&self) -> usize {
        let cleared = {
            let mut entries = self.entries.write();
            let cleared = entries.len();
            entries.clear();
            cleared
        };
        if let Some(store) = self.store.as_ref() {
            if let Err(e) = store.clear().await {
                warn!("Cache {} clear failed: {}", store.name(), e);
            }
        }
        cleared
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.len();
        let counters = self.counters.lock().clone();
        let lookups = counters.hits + counters.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            counters.hits as f64 / lookups as f64
        };

        CacheStats {
            hits: counters.hits,
            misses: counters.misses,
            store_hits: counters.store_hits,
            inserts: counters.inserts,
            evictions: counters.evictions,
            expirations: counters.expirations,
            entries,
            hit_rate,
            store: self.store.as_ref().map(|store| store.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<String, StoredEntry>>,
    }

    #[async_trait]
    impl CacheStore for MemoryStore {
        async fn load(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
            Ok(self.rows.lock().get(key).cloned())
        }

        async fn save(&self, key: &str, entry: &StoredEntry) -> Result<(), StoreError> {
            self.rows.lock().insert(key.to_string(), entry.clone());
            Ok(())
        }

        async fn clear(&self) -> Result<(), StoreError> {
            self.rows.lock().clear();
            Ok(())
        }

        fn name(&self) -> &'static str {
            "memory-test"
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn load(&self, _key: &str) -> Result<Option<StoredEntry>, StoreError> {
            Err(StoreError::Query("connection reset".into()))
        }

        async fn save(&self, _key: &str, _entry: &StoredEntry) -> Result<(), StoreError> {
            Err(StoreError::Query("connection reset".into()))
        }

        async fn clear(&self) -> Result<(), StoreError> {
            Err(StoreError::Query("connection reset".into()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[test]
    fn key_is_independent_of_parameter_order() {
        let a = cache_key("/historical_data", &[("stock_name", "TCS"), ("period", "1yr")]);
        let b = cache_key("/historical_data", &[("period", "1yr"), ("stock_name", "TCS")]);
        assert_eq!(a, b);
        assert_eq!(a, "/historical_data?period=1yr&stock_name=TCS");
        assert_eq!(cache_key("/trending", &[]), "/trending");
    }

    #[test]
    fn every_category_has_a_ttl() {
        for category in [
            DataCategory::StockData,
            DataCategory::HistoricalData,
            DataCategory::MarketData,
            DataCategory::News,
            DataCategory::Ipo,
        ] {
            assert!(category.default_ttl() > Duration::ZERO);
        }
        assert!(
            DataCategory::StockData.default_ttl() < DataCategory::HistoricalData.default_ttl()
        );
    }

    #[test]
    fn hit_within_ttl_and_miss_after() {
        let cache = CacheService::new(10);
        cache.set("k", json!({"v": 1}), Duration::from_millis(40));
        assert_eq!(cache.get("k"), Some(json!({"v": 1})));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get("k"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn full_cache_prefers_expired_then_oldest() {
        let cache = CacheService::new(2);
        cache.set("stale", json!(1), Duration::from_millis(1));
        cache.set("old", json!(2), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(5));

        cache.set("new", json!(3), Duration::from_secs(60));
        assert!(cache.peek("old").is_some());
        assert_eq!(cache.stats().evictions, 0);

        cache.set("newest", json!(4), Duration::from_secs(60));
        assert!(cache.peek("old").is_none());
        assert!(cache.peek("new").is_some());
        assert!(cache.peek("newest").is_some());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn overwriting_a_key_does_not_evict() {
        let cache = CacheService::new(1);
        cache.set("k", json!(1), Duration::from_secs(60));
        cache.set("k", json!(2), Duration::from_secs(60));
        assert_eq!(cache.peek("k"), Some(json!(2)));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn lookups_share_the_read_lock() {
        let cache = CacheService::new(10);
        cache.set("k", json!(1), Duration::from_secs(60));

        let _reader = cache.entries.read();
        assert_eq!(cache.get("k"), Some(json!(1)));
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn purge_and_clear() {
        let cache = CacheService::new(10);
        cache.set("a", json!(1), Duration::from_millis(1));
        cache.set("b", json!(2), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.clear().await, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_the_persistent_tier() {
        let store = Arc::new(MemoryStore::default());
        let cache = CacheService::new(10).with_store(store.clone());
        cache
            .write_through("/news", json!([{"title": "Nifty flat"}]), Duration::from_secs(60))
            .await;

        assert_eq!(cache.clear().await, 1);
        assert!(store.rows.lock().is_empty());
        assert_eq!(cache.read_through("/news").await, None);
    }

    #[tokio::test]
    async fn failed_store_clear_still_empties_memory() {
        let cache = CacheService::new(10).with_store(Arc::new(BrokenStore));
        cache.set("/ipo", json!([]), Duration::from_secs(60));
        assert_eq!(cache.clear().await, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn persistent_tier_refills_memory() {
        let store = Arc::new(MemoryStore::default());
        let writer = CacheService::new(10).with_store(store.clone());
        writer
            .write_through("/stock?name=TCS", json!({"price": 3500}), Duration::from_secs(60))
            .await;

        // Fresh process: empty memory, same store.
        let reader = CacheService::new(10).with_store(store);
        assert_eq!(
            reader.read_through("/stock?name=TCS").await,
            Some(json!({"price": 3500}))
        );
        assert!(reader.peek("/stock?name=TCS").is_some());
        assert_eq!(reader.stats().store_hits, 1);
        assert_eq!(reader.stats().store, Some("memory-test"));
    }

    #[tokio::test]
    async fn stale_persistent_rows_are_ignored() {
        let store = Arc::new(MemoryStore::default());
        store.rows.lock().insert(
            "/news".to_string(),
            StoredEntry {
                payload: json!([]),
                fetched_at: Utc::now() - chrono::Duration::minutes(30),
                ttl: DataCategory::News.default_ttl(),
            },
        );
        let cache = CacheService::new(10).with_store(store);
        assert_eq!(cache.read_through("/news").await, None);
    }

    #[tokio::test]
    async fn store_failures_fall_back_to_memory() {
        let cache = CacheService::new(10).with_store(Arc::new(BrokenStore));
        assert_eq!(cache.read_through("/ipo").await, None);

        cache
            .write_through("/ipo", json!({"upcoming": []}), Duration::from_secs(60))
            .await;
        assert_eq!(cache.read_through("/ipo").await, Some(json!({"upcoming": []})));
    }
}
