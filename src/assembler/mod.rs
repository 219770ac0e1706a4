//! Request-time context assembly.
//!
//! Assembly is read-only: it composes whatever the cache and store
//! currently hold into one immutable value. It never triggers a fetch and
//! never waits on a refresh; sections that have no data yet are marked
//! absent instead of blocking the request.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::cache::SnapshotCache;
use crate::market::DatasetSpec;
use crate::store::Store;

/// Point-in-time view handed unchanged to the AI adapter.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    pub market: Vec<MarketSection>,
    pub questionnaire: Option<serde_json::Value>,
    pub history: Vec<HistoryEntry>,
    pub assembled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketSection {
    pub dataset: String,
    pub payload: Option<serde_json::Value>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub role: String,
    pub body: String,
}

pub struct ContextAssembler {
    store: Arc<Store>,
    cache: Arc<SnapshotCache>,
    datasets: Vec<DatasetSpec>,
    history_limit: i64,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<Store>,
        cache: Arc<SnapshotCache>,
        datasets: Vec<DatasetSpec>,
        history_limit: i64,
    ) -> Self {
        Self {
            store,
            cache,
            datasets,
            history_limit,
        }
    }

    /// Datasets relevant to a session's status tag. Management sessions only
    /// need the exchange overview; pre-trade sessions see everything.
    fn relevant_datasets(&self, status: &str) -> Vec<&DatasetSpec> {
        if status.eq_ignore_ascii_case("management") {
            let filtered: Vec<&DatasetSpec> = self
                .datasets
                .iter()
                .filter(|spec| spec.id == "market_overview")
                .collect();
            if !filtered.is_empty() {
                return filtered;
            }
        }
        self.datasets.iter().collect()
    }

    pub async fn assemble(
        &self,
        user_id: &str,
        session_id: &str,
        status: &str,
    ) -> Result<AssembledContext> {
        let questionnaire = self
            .store
            .get_questionnaire(user_id)
            .await?
            .map(|response| response.answers);

        let messages = self
            .store
            .recent_messages(session_id, self.history_limit)
            .await?;

        let market = self
            .relevant_datasets(status)
            .into_iter()
            .map(|spec| match self.cache.get(&spec.id) {
                Some(cached) => MarketSection {
                    dataset: spec.id.clone(),
                    payload: Some(cached.snapshot.payload.clone()),
                    fetched_at: Some(cached.snapshot.fetched_at),
                    stale: cached.stale,
                },
                None => MarketSection {
                    dataset: spec.id.clone(),
                    payload: None,
                    fetched_at: None,
                    stale: false,
                },
            })
            .collect();

        Ok(AssembledContext {
            market,
            questionnaire,
            history: messages
                .into_iter()
                .map(|m| HistoryEntry {
                    role: m.role,
                    body: m.body,
                })
                .collect(),
            assembled_at: Utc::now(),
        })
    }
}
