//! Persistence layer: SQLite store for chat sessions, messages,
//! questionnaire responses, and the snapshot audit trail.
//!
//! All mutating operations funnel through a single write gate, whatever the
//! caller. The underlying store does not tolerate concurrent writers, and
//! the invariant (no interleaved partial writes, monotonic per-session
//! message sequence) must hold regardless of the store's own locking.
//! Readers use the pool directly and never wait on the gate.

mod chat;
mod questionnaire;
mod snapshot;

pub use chat::{ChatMessage, ChatSession, ROLE_ASSISTANT, ROLE_USER};
pub use questionnaire::QuestionnaireResponse;

use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A mutation failed. Fatal for that write; logged and surfaced to the
    /// caller, never a process crash.
    #[error("write failed: {0}")]
    WriteFailed(#[source] sqlx::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid stored data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("chat session {0} not found")]
    SessionNotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub struct Store {
    pool: SqlitePool,
    write_gate: Mutex<()>,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_gate: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
