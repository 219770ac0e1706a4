//! Periodic refresh scheduling: one owned job per dataset, jittered
//! intervals, and failure-driven interval backoff.
//!
//! Each dataset runs on its own task with its own state; one dataset's
//! persistent failure never blocks or delays another's schedule.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::SnapshotCache;
use crate::market::{DatasetSpec, FetchError, MarketFetch};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fraction of the base interval added as random jitter to each
    /// next-due time, desynchronizing datasets on the same provider.
    pub jitter_fraction: f64,
    /// Consecutive failures tolerated before backoff kicks in.
    pub failure_threshold: u32,
    /// Interval multiplier applied per failure beyond the threshold.
    pub backoff_factor: f64,
    /// Ceiling on the backoff multiplier.
    pub max_backoff_mult: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            jitter_fraction: 0.1,
            failure_threshold: 0,
            backoff_factor: 2.0,
            max_backoff_mult: 8.0,
        }
    }
}

/// Per-dataset refresh state. Owned exclusively by the task running the
/// job's loop; nothing else mutates it.
#[derive(Debug, Clone)]
pub struct RefreshJob {
    pub spec: DatasetSpec,
    pub consecutive_failures: u32,
}

impl RefreshJob {
    pub fn new(spec: DatasetSpec) -> Self {
        Self {
            spec,
            consecutive_failures: 0,
        }
    }

    /// The interval currently in effect, including failure backoff. Grows
    /// geometrically per failure beyond the threshold, capped, and returns
    /// to baseline after one success.
    pub fn effective_interval(&self, config: &SchedulerConfig) -> Duration {
        let excess = self
            .consecutive_failures
            .saturating_sub(config.failure_threshold);
        if excess == 0 {
            return self.spec.interval;
        }
        let mult = config
            .backoff_factor
            .powi(excess.min(i32::MAX as u32) as i32)
            .min(config.max_backoff_mult)
            .max(1.0);
        self.spec.interval.mul_f64(mult)
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}

/// Spawns and owns the refresh tasks. Shutdown is explicit: jobs are
/// signalled, given a grace period, then aborted.
pub struct Scheduler {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn start(
        datasets: Vec<DatasetSpec>,
        fetcher: Arc<dyn MarketFetch>,
        cache: Arc<SnapshotCache>,
        store: Arc<Store>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = datasets
            .into_iter()
            .map(|spec| {
                let fetcher = Arc::clone(&fetcher);
                let cache = Arc::clone(&cache);
                let store = Arc::clone(&store);
                let config = config.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(run_job(
                    RefreshJob::new(spec),
                    fetcher,
                    cache,
                    store,
                    config,
                    shutdown_rx,
                ))
            })
            .collect();

        Self {
            handles,
            shutdown_tx,
        }
    }

    /// Signals all jobs to stop and waits up to `grace` for each. In-flight
    /// fetches are aborted and their partial results discarded.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        for mut handle in self.handles {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!("refresh job did not stop within the grace period, aborting");
                handle.abort();
            }
        }
        info!("scheduler stopped");
    }
}

async fn run_job(
    mut job: RefreshJob,
    fetcher: Arc<dyn MarketFetch>,
    cache: Arc<SnapshotCache>,
    store: Arc<Store>,
    config: SchedulerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        dataset = %job.spec.id,
        interval_secs = job.spec.interval.as_secs(),
        "refresh job started"
    );

    loop {
        // Shutdown aborts the in-flight fetch; a partially fetched snapshot
        // is discarded, never cached.
        let result = tokio::select! {
            _ = shutdown.changed() => break,
            result = fetcher.fetch(&job.spec) => result,
        };

        match result {
            Ok(snapshot) => {
                cache.put(snapshot.clone(), job.spec.ttl);
                if let Err(e) = store.record_snapshot(&snapshot).await {
                    error!(dataset = %job.spec.id, error = %e, "failed to record snapshot audit row");
                }
                job.record_success();
                info!(dataset = %job.spec.id, "snapshot refreshed");
            }
            Err(FetchError::RateLimited { retry_after }) => {
                job.record_failure();
                warn!(
                    dataset = %job.spec.id,
                    failures = job.consecutive_failures,
                    retry_after = ?retry_after,
                    "provider throttled, backing off"
                );
            }
            Err(e) => {
                job.record_failure();
                warn!(
                    dataset = %job.spec.id,
                    failures = job.consecutive_failures,
                    error = %e,
                    "refresh failed"
                );
            }
        }

        // Next due is measured from now, not from the previous due time, so
        // a slow or failed run never piles up a backlog.
        let delay = job.effective_interval(&config) + jitter_delay(job.spec.interval, config.jitter_fraction);
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!(dataset = %job.spec.id, "refresh job stopped");
}

fn jitter_delay(interval: Duration, fraction: f64) -> Duration {
    let bound = interval.as_secs_f64() * fraction;
    if bound <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..bound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Provider;

    fn job_with_interval(secs: u64) -> RefreshJob {
        RefreshJob::new(DatasetSpec {
            id: "market_overview".to_string(),
            provider: Provider::Bybit,
            interval: Duration::from_secs(secs),
            ttl: Duration::from_secs(secs),
        })
    }

    #[test]
    fn test_backoff_grows_geometrically_and_resets() {
        let config = SchedulerConfig::default();
        let mut job = job_with_interval(1800);

        assert_eq!(job.effective_interval(&config), Duration::from_secs(1800));

        job.record_failure();
        assert_eq!(job.effective_interval(&config), Duration::from_secs(3600));

        job.record_failure();
        assert_eq!(job.effective_interval(&config), Duration::from_secs(7200));

        job.record_success();
        assert_eq!(job.effective_interval(&config), Duration::from_secs(1800));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = SchedulerConfig::default();
        let mut job = job_with_interval(1800);

        for _ in 0..20 {
            job.record_failure();
        }
        assert_eq!(
            job.effective_interval(&config),
            Duration::from_secs(1800 * 8)
        );
    }

    #[test]
    fn test_failure_threshold_delays_backoff() {
        let config = SchedulerConfig {
            failure_threshold: 2,
            ..SchedulerConfig::default()
        };
        let mut job = job_with_interval(600);

        job.record_failure();
        job.record_failure();
        assert_eq!(job.effective_interval(&config), Duration::from_secs(600));

        job.record_failure();
        assert_eq!(job.effective_interval(&config), Duration::from_secs(1200));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let interval = Duration::from_secs(1800);
        for _ in 0..100 {
            let j = jitter_delay(interval, 0.1);
            assert!(j < Duration::from_secs(180));
        }
        assert_eq!(jitter_delay(interval, 0.0), Duration::ZERO);
    }
}
