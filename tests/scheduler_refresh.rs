use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use marketmind::cache::SnapshotCache;
use marketmind::db::Database;
use marketmind::market::{DatasetSpec, FetchError, FetchResult, MarketFetch, MarketSnapshot, Provider};
use marketmind::scheduler::{Scheduler, SchedulerConfig};
use marketmind::store::Store;
use serde_json::json;
use tempfile::TempDir;

/// Succeeds for every dataset except ones whose id starts with "bad".
struct StubFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl MarketFetch for StubFetcher {
    async fn fetch(&self, spec: &DatasetSpec) -> FetchResult<MarketSnapshot> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if spec.id.starts_with("bad") {
            return Err(FetchError::RateLimited { retry_after: None });
        }
        Ok(MarketSnapshot {
            dataset: spec.id.clone(),
            payload: json!({ "n": n }),
            source: "stub".to_string(),
            fetched_at: Utc::now(),
        })
    }
}

fn dataset(id: &str, interval_ms: u64) -> DatasetSpec {
    DatasetSpec {
        id: id.to_string(),
        provider: Provider::Bybit,
        interval: Duration::from_millis(interval_ms),
        ttl: Duration::from_millis(interval_ms),
    }
}

fn no_jitter_config() -> SchedulerConfig {
    SchedulerConfig {
        jitter_fraction: 0.0,
        failure_threshold: 0,
        backoff_factor: 2.0,
        max_backoff_mult: 8.0,
    }
}

async fn setup_store() -> (TempDir, Arc<Store>) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("test.db");

    let db = Database::new(path.to_str().expect("path"), 5)
        .await
        .expect("Failed to open test database");
    db.run_migrations().await.expect("Failed to run migrations");

    (dir, Arc::new(Store::new(db.pool.clone())))
}

#[tokio::test]
async fn test_refresh_populates_cache_and_audit_trail() {
    let (_dir, store) = setup_store().await;
    let cache = Arc::new(SnapshotCache::new());
    let fetcher = Arc::new(StubFetcher {
        calls: AtomicUsize::new(0),
    });

    let scheduler = Scheduler::start(
        vec![dataset("market_overview", 50)],
        Arc::clone(&fetcher) as Arc<dyn MarketFetch>,
        Arc::clone(&cache),
        Arc::clone(&store),
        no_jitter_config(),
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    scheduler.shutdown(Duration::from_secs(2)).await;

    // first fetch is immediate, then roughly every 50ms
    assert!(fetcher.calls.load(Ordering::SeqCst) >= 2);

    let cached = cache.get("market_overview").expect("snapshot cached");
    assert_eq!(cached.snapshot.source, "stub");
    assert!(!cached.stale);

    let audited = store
        .snapshot_count("market_overview")
        .await
        .expect("count");
    assert!(audited >= 2);
}

#[tokio::test]
async fn test_failing_dataset_does_not_block_others() {
    let (_dir, store) = setup_store().await;
    let cache = Arc::new(SnapshotCache::new());
    let fetcher = Arc::new(StubFetcher {
        calls: AtomicUsize::new(0),
    });

    let scheduler = Scheduler::start(
        vec![dataset("bad_feed", 50), dataset("market_overview", 50)],
        Arc::clone(&fetcher) as Arc<dyn MarketFetch>,
        Arc::clone(&cache),
        Arc::clone(&store),
        no_jitter_config(),
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    scheduler.shutdown(Duration::from_secs(2)).await;

    // the healthy dataset refreshed normally despite the throttled one
    assert!(cache.get("market_overview").is_some());
    assert!(cache.get("bad_feed").is_none());
}

#[tokio::test]
async fn test_shutdown_stops_refreshing() {
    let (_dir, store) = setup_store().await;
    let cache = Arc::new(SnapshotCache::new());
    let fetcher = Arc::new(StubFetcher {
        calls: AtomicUsize::new(0),
    });

    let scheduler = Scheduler::start(
        vec![dataset("market_overview", 50)],
        Arc::clone(&fetcher) as Arc<dyn MarketFetch>,
        Arc::clone(&cache),
        Arc::clone(&store),
        no_jitter_config(),
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    scheduler.shutdown(Duration::from_secs(2)).await;

    let calls_at_shutdown = fetcher.calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), calls_at_shutdown);
}
