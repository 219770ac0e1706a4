use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::info;
use uuid::Uuid;

use super::{Store, StoreError, StoreResult};

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

/// A chat session, created on the first message from a user. Never deleted
/// by this service.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatSession {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One message in a session. Append-only; `seq` orders messages within the
/// session and is assigned under the write gate.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: String,
    pub seq: i64,
    pub role: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Store {
    pub async fn create_session(
        &self,
        user_id: &str,
        status: &str,
        title: Option<&str>,
    ) -> StoreResult<ChatSession> {
        let now = Utc::now();
        let session = ChatSession {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.map(str::to_string),
            status: status.to_string(),
            created_at: now,
            updated_at: now,
        };

        let _guard = self.write_gate.lock().await;
        sqlx::query(
            "INSERT INTO chat_sessions (id, user_id, title, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.title)
        .bind(&session.status)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::WriteFailed)?;

        info!(session_id = %session.id, status = %session.status, "Created chat session");
        Ok(session)
    }

    pub async fn get_session(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<ChatSession>> {
        let session = sqlx::query_as::<_, ChatSession>(
            "SELECT id, user_id, title, status, created_at, updated_at \
             FROM chat_sessions WHERE id = ?1 AND user_id = ?2",
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    pub async fn recent_sessions(&self, user_id: &str, limit: i64) -> StoreResult<Vec<ChatSession>> {
        let sessions = sqlx::query_as::<_, ChatSession>(
            "SELECT id, user_id, title, status, created_at, updated_at \
             FROM chat_sessions WHERE user_id = ?1 \
             ORDER BY updated_at DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    /// Appends a message. The sequence number is computed inside the gated
    /// transaction, so concurrent appends to the same session serialize in
    /// arrival order and the per-session sequence stays monotonic.
    pub async fn append_message(
        &self,
        session_id: &str,
        role: &str,
        body: &str,
    ) -> StoreResult<ChatMessage> {
        let now = Utc::now();

        let _guard = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await.map_err(StoreError::WriteFailed)?;

        let seq: i64 = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM chat_messages WHERE session_id = ?1",
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::WriteFailed)?;

        let result = sqlx::query(
            "INSERT INTO chat_messages (session_id, seq, role, body, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(session_id)
        .bind(seq)
        .bind(role)
        .bind(body)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::WriteFailed)?;

        sqlx::query("UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2")
            .bind(now)
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::WriteFailed)?;

        tx.commit().await.map_err(StoreError::WriteFailed)?;

        Ok(ChatMessage {
            id: result.last_insert_rowid(),
            session_id: session_id.to_string(),
            seq,
            role: role.to_string(),
            body: body.to_string(),
            created_at: now,
        })
    }

    /// The most recent `limit` messages of a session, oldest first.
    pub async fn recent_messages(
        &self,
        session_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<ChatMessage>> {
        let mut messages = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, session_id, seq, role, body, created_at \
             FROM chat_messages WHERE session_id = ?1 \
             ORDER BY seq DESC LIMIT ?2",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        messages.reverse();
        Ok(messages)
    }

    pub async fn session_messages(&self, session_id: &str) -> StoreResult<Vec<ChatMessage>> {
        let messages = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, session_id, seq, role, body, created_at \
             FROM chat_messages WHERE session_id = ?1 \
             ORDER BY seq ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }
}
