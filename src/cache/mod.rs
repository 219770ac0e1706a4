//! In-memory snapshot cache with per-entry TTL tagging.
//!
//! The cache holds at most one current snapshot per dataset. A `put`
//! replaces the whole entry behind an `Arc`, so concurrent readers observe
//! either the previous snapshot or the new one in full. Entries are only
//! ever evicted by replacement; the dataset key space is small and bounded
//! by configuration.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::market::MarketSnapshot;

/// A cache read result. `stale` is a flag, not an error: callers may serve
/// a stale snapshot while a refresh is in flight.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub snapshot: Arc<MarketSnapshot>,
    pub stale: bool,
    pub age: Duration,
}

struct CacheEntry {
    snapshot: Arc<MarketSnapshot>,
    ttl: Duration,
}

#[derive(Default)]
pub struct SnapshotCache {
    entries: DashMap<String, CacheEntry>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Atomically replaces any prior snapshot for the dataset.
    pub fn put(&self, snapshot: MarketSnapshot, ttl: Duration) {
        self.entries.insert(
            snapshot.dataset.clone(),
            CacheEntry {
                snapshot: Arc::new(snapshot),
                ttl,
            },
        );
    }

    /// Returns the current snapshot for the dataset, tagged with its age and
    /// whether it has outlived its TTL.
    pub fn get(&self, dataset: &str) -> Option<CachedSnapshot> {
        let entry = self.entries.get(dataset)?;
        let age = (Utc::now() - entry.snapshot.fetched_at)
            .to_std()
            .unwrap_or_default();
        Some(CachedSnapshot {
            snapshot: Arc::clone(&entry.snapshot),
            stale: age > entry.ttl,
            age,
        })
    }

    pub fn datasets(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn snapshot_aged(dataset: &str, age_secs: i64, payload: serde_json::Value) -> MarketSnapshot {
        MarketSnapshot {
            dataset: dataset.to_string(),
            payload,
            source: "test".to_string(),
            fetched_at: Utc::now() - ChronoDuration::seconds(age_secs),
        }
    }

    #[test]
    fn test_get_missing_dataset() {
        let cache = SnapshotCache::new();
        assert!(cache.get("market_overview").is_none());
    }

    #[test]
    fn test_freshness_tagging_around_ttl() {
        let cache = SnapshotCache::new();
        let ttl = Duration::from_secs(1800);

        cache.put(snapshot_aged("market_overview", 1700, json!({"v": 1})), ttl);
        let fresh = cache.get("market_overview").expect("cached entry");
        assert!(!fresh.stale);
        assert_eq!(fresh.snapshot.payload, json!({"v": 1}));

        cache.put(snapshot_aged("market_overview", 1900, json!({"v": 1})), ttl);
        let stale = cache.get("market_overview").expect("cached entry");
        assert!(stale.stale);
        // stale data is still served with the original payload
        assert_eq!(stale.snapshot.payload, json!({"v": 1}));
        assert!(stale.age >= Duration::from_secs(1900));
    }

    #[test]
    fn test_put_replaces_prior_entry() {
        let cache = SnapshotCache::new();
        let ttl = Duration::from_secs(60);

        cache.put(snapshot_aged("fully_diluted", 0, json!({"v": 1})), ttl);
        cache.put(snapshot_aged("fully_diluted", 0, json!({"v": 2})), ttl);

        assert_eq!(cache.len(), 1);
        let current = cache.get("fully_diluted").expect("cached entry");
        assert_eq!(current.snapshot.payload, json!({"v": 2}));
    }

    #[tokio::test]
    async fn test_concurrent_replace_never_tears() {
        let cache = Arc::new(SnapshotCache::new());
        let ttl = Duration::from_secs(60);

        // Each snapshot's payload is internally consistent: both fields
        // carry the same version. A torn read would mix versions.
        let writer = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                for v in 0..500i64 {
                    cache.put(
                        snapshot_aged("market_overview", 0, json!({"a": v, "b": v})),
                        ttl,
                    );
                    tokio::task::yield_now().await;
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    for _ in 0..500 {
                        if let Some(cached) = cache.get("market_overview") {
                            let a = cached.snapshot.payload["a"].as_i64();
                            let b = cached.snapshot.payload["b"].as_i64();
                            assert_eq!(a, b, "observed a torn snapshot");
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.expect("writer panicked");
        for reader in readers {
            reader.await.expect("reader panicked");
        }
    }
}
