//! Market data ingestion: dataset definitions, immutable snapshots, and the
//! rate-limited fetcher that talks to the external providers.

pub mod errors;
pub mod fetcher;
pub mod pace;
pub mod retry;

pub use errors::{FetchError, FetchResult};
pub use fetcher::MarketFetcher;
pub use pace::PaceGate;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// External data provider. Datasets sharing a provider also share its
/// call-pacing gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Bybit,
    Coingecko,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Bybit => "bybit",
            Provider::Coingecko => "coingecko",
        }
    }
}

/// A configured dataset: a named category of market data refreshed on its
/// own schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub id: String,
    pub provider: Provider,
    pub interval: Duration,
    pub ttl: Duration,
}

/// One immutable fetched copy of a dataset's current value. A new fetch
/// produces a new snapshot; existing snapshots are never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub dataset: String,
    pub payload: serde_json::Value,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

/// Fetch contract the scheduler drives. Implemented by [`MarketFetcher`];
/// tests substitute stubs.
#[async_trait]
pub trait MarketFetch: Send + Sync {
    async fn fetch(&self, spec: &DatasetSpec) -> FetchResult<MarketSnapshot>;
}
