use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::{Store, StoreError, StoreResult};
use crate::market::MarketSnapshot;

#[derive(FromRow)]
struct SnapshotRow {
    dataset: String,
    payload: String,
    source: String,
    fetched_at: DateTime<Utc>,
}

impl Store {
    /// Appends a snapshot to the durable audit trail. The in-memory cache
    /// remains the serving copy.
    pub async fn record_snapshot(&self, snapshot: &MarketSnapshot) -> StoreResult<()> {
        let payload = serde_json::to_string(&snapshot.payload)?;

        let _guard = self.write_gate.lock().await;
        sqlx::query(
            "INSERT INTO market_snapshots (dataset, payload, source, fetched_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&snapshot.dataset)
        .bind(payload)
        .bind(&snapshot.source)
        .bind(snapshot.fetched_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::WriteFailed)?;

        Ok(())
    }

    /// The newest audit row for a dataset; used to warm the cache at
    /// startup so requests see last-known data before the first refresh.
    pub async fn latest_snapshot(&self, dataset: &str) -> StoreResult<Option<MarketSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            "SELECT dataset, payload, source, fetched_at \
             FROM market_snapshots WHERE dataset = ?1 \
             ORDER BY fetched_at DESC, id DESC LIMIT 1",
        )
        .bind(dataset)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(MarketSnapshot {
                dataset: row.dataset,
                payload: serde_json::from_str(&row.payload)?,
                source: row.source,
                fetched_at: row.fetched_at,
            })),
            None => Ok(None),
        }
    }

    pub async fn snapshot_count(&self, dataset: &str) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM market_snapshots WHERE dataset = ?1",
        )
        .bind(dataset)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
