use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::info;

use super::{Store, StoreError, StoreResult};

/// The single authoritative questionnaire row for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionnaireResponse {
    pub user_id: String,
    pub answers: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct QuestionnaireRow {
    user_id: String,
    answers: String,
    updated_at: DateTime<Utc>,
}

impl Store {
    /// Whole-row last-writer-wins upsert keyed by user id. Partial fields
    /// are never merged.
    pub async fn upsert_questionnaire(
        &self,
        user_id: &str,
        answers: &serde_json::Value,
    ) -> StoreResult<()> {
        let body = serde_json::to_string(answers)?;
        let now = Utc::now();

        let _guard = self.write_gate.lock().await;
        sqlx::query(
            "INSERT INTO questionnaire_responses (user_id, answers, updated_at) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT (user_id) DO UPDATE SET \
               answers = excluded.answers, updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(body)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::WriteFailed)?;

        info!(user_id = %user_id, "Saved questionnaire response");
        Ok(())
    }

    pub async fn get_questionnaire(
        &self,
        user_id: &str,
    ) -> StoreResult<Option<QuestionnaireResponse>> {
        let row = sqlx::query_as::<_, QuestionnaireRow>(
            "SELECT user_id, answers, updated_at \
             FROM questionnaire_responses WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(QuestionnaireResponse {
                user_id: row.user_id,
                answers: serde_json::from_str(&row.answers)?,
                updated_at: row.updated_at,
            })),
            None => Ok(None),
        }
    }
}
