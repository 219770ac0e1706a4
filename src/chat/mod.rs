//! Chat turn orchestration: persist the user message, assemble context,
//! call the assistant (or degrade), persist the reply.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, warn};

use crate::ai::{prompts, AiClient, AiError};
use crate::assembler::ContextAssembler;
use crate::store::{ChatMessage, ChatSession, Store, StoreError, ROLE_ASSISTANT, ROLE_USER};

/// Served instead of a failure when the assistant cannot be reached. The
/// user's message is persisted either way.
pub const DEGRADED_REPLY: &str =
    "The assistant is temporarily unavailable. Your message has been saved - please try again shortly.";

const TITLE_MAX_CHARS: usize = 50;

pub struct ChatOutcome {
    pub session: ChatSession,
    pub reply: ChatMessage,
    pub new_session: bool,
    pub degraded: bool,
}

pub struct ChatService {
    store: Arc<Store>,
    assembler: Arc<ContextAssembler>,
    ai: Arc<AiClient>,
}

impl ChatService {
    pub fn new(store: Arc<Store>, assembler: Arc<ContextAssembler>, ai: Arc<AiClient>) -> Self {
        Self {
            store,
            assembler,
            ai,
        }
    }

    pub async fn send_message(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        status: Option<&str>,
        message: &str,
    ) -> Result<ChatOutcome> {
        let (session, new_session) = match session_id {
            Some(id) => {
                let session = self
                    .store
                    .get_session(id, user_id)
                    .await?
                    .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
                (session, false)
            }
            None => {
                let status = status.context("status is required for a new chat session")?;
                let title = session_title(message, status);
                let session = self
                    .store
                    .create_session(user_id, status, Some(&title))
                    .await?;
                (session, true)
            }
        };

        self.store
            .append_message(&session.id, ROLE_USER, message)
            .await?;

        let context = self
            .assembler
            .assemble(user_id, &session.id, &session.status)
            .await?;
        let system = prompts::build_advisor_system_message(&session.status, &context);

        // the message being answered rides separately, not as history
        let mut history: Vec<(String, String)> = context
            .history
            .iter()
            .map(|entry| (entry.role.clone(), entry.body.clone()))
            .collect();
        history.pop();

        let (reply_text, degraded) = match self.ai.generate(&system, &history, message).await {
            Ok(text) => (text, false),
            Err(AiError::Unavailable(reason)) => {
                warn!(reason = %reason, "assistant unavailable, serving degraded reply");
                (DEGRADED_REPLY.to_string(), true)
            }
            Err(e) => {
                error!(error = %e, "assistant call failed after retries, serving degraded reply");
                (DEGRADED_REPLY.to_string(), true)
            }
        };

        let reply = self
            .store
            .append_message(&session.id, ROLE_ASSISTANT, &reply_text)
            .await?;

        Ok(ChatOutcome {
            session,
            reply,
            new_session,
            degraded,
        })
    }

    pub async fn history(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<(ChatSession, Vec<ChatMessage>)>> {
        let Some(session) = self.store.get_session(session_id, user_id).await? else {
            return Ok(None);
        };
        let messages = self.store.session_messages(session_id).await?;
        Ok(Some((session, messages)))
    }

    pub async fn recent(&self, user_id: &str, limit: i64) -> Result<Vec<ChatSession>> {
        Ok(self.store.recent_sessions(user_id, limit).await?)
    }
}

/// Session title from the first user message, prefixed by the status tag.
fn session_title(first_message: &str, status: &str) -> String {
    let prefix = if status.eq_ignore_ascii_case("management") {
        "Management"
    } else {
        "Pre-trade"
    };

    let trimmed = first_message.trim();
    let mut base: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        base.push_str("...");
    }

    format!("{prefix}: {base}")
}
