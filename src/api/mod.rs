//! HTTP surface. Authentication lives upstream; the caller's identity
//! arrives as the `X-User-Id` header set by that layer.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use crate::cache::SnapshotCache;
use crate::chat::ChatService;
use crate::config::Config;
use crate::store::{ChatMessage, ChatSession, Store};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub cache: Arc<SnapshotCache>,
    pub chat: Arc<ChatService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/chat/message", post(post_chat_message))
        .route("/api/chat/recent", get(get_recent_chats))
        .route("/api/chat/:id/history", get(get_chat_history))
        .route("/api/questionnaire", get(get_questionnaire))
        .route("/api/questionnaire/save", post(save_questionnaire))
        .route("/api/market", get(list_market))
        .route("/api/market/:dataset", get(get_market))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
            ApiError::Internal(e) => {
                error!(error = ?e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(e: crate::store::StoreError) -> Self {
        ApiError::Internal(e.into())
    }
}

fn require_user(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing X-User-Id header".to_string()))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "marketmind",
        "status": "active",
        "version": env!("CARGO_PKG_VERSION"),
        "datasets": state
            .config
            .market
            .datasets
            .iter()
            .map(|d| d.id.clone())
            .collect::<Vec<_>>(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ChatMessageRequest {
    pub message: String,
    pub status: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatMessageResponse {
    pub session_id: String,
    pub reply: String,
    pub new_session: bool,
    pub degraded: bool,
}

async fn post_chat_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatMessageRequest>,
) -> Result<Json<ChatMessageResponse>, ApiError> {
    let user_id = require_user(&headers)?;

    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    match (&request.session_id, &request.status) {
        (None, None) => {
            return Err(ApiError::BadRequest(
                "status is required for a new chat session".to_string(),
            ));
        }
        (Some(id), _) => {
            if state.store.get_session(id, &user_id).await?.is_none() {
                return Err(ApiError::NotFound(format!("chat session {id} not found")));
            }
        }
        _ => {}
    }

    let outcome = state
        .chat
        .send_message(
            &user_id,
            request.session_id.as_deref(),
            request.status.as_deref(),
            &request.message,
        )
        .await?;

    Ok(Json(ChatMessageResponse {
        session_id: outcome.session.id,
        reply: outcome.reply.body,
        new_session: outcome.new_session,
        degraded: outcome.degraded,
    }))
}

#[derive(Debug, Serialize)]
pub struct ChatListResponse {
    pub chats: Vec<ChatSession>,
}

async fn get_recent_chats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ChatListResponse>, ApiError> {
    let user_id = require_user(&headers)?;
    let chats = state.chat.recent(&user_id, 50).await?;
    Ok(Json(ChatListResponse { chats }))
}

#[derive(Debug, Serialize)]
pub struct ChatHistoryResponse {
    pub session: ChatSession,
    pub messages: Vec<ChatMessage>,
}

async fn get_chat_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<ChatHistoryResponse>, ApiError> {
    let user_id = require_user(&headers)?;

    let (session, messages) = state
        .chat
        .history(&user_id, &session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("chat session {session_id} not found")))?;

    Ok(Json(ChatHistoryResponse { session, messages }))
}

async fn get_questionnaire(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user_id = require_user(&headers)?;

    let response = state.store.get_questionnaire(&user_id).await?;
    let (answers, updated_at): (Value, Option<DateTime<Utc>>) = match response {
        Some(r) => (r.answers, Some(r.updated_at)),
        None => (Value::Null, None),
    };

    Ok(Json(json!({ "answers": answers, "updated_at": updated_at })))
}

#[derive(Debug, Deserialize)]
pub struct SaveQuestionnaireRequest {
    pub answers: Value,
}

async fn save_questionnaire(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SaveQuestionnaireRequest>,
) -> Result<Json<Value>, ApiError> {
    let user_id = require_user(&headers)?;

    if !request.answers.is_array() {
        return Err(ApiError::BadRequest(
            "answers must be an array of question/answer pairs".to_string(),
        ));
    }

    state
        .store
        .upsert_questionnaire(&user_id, &request.answers)
        .await?;

    Ok(Json(json!({ "saved": true })))
}

async fn list_market(State(state): State<AppState>) -> Json<Value> {
    let datasets: Vec<Value> = state
        .config
        .market
        .datasets
        .iter()
        .map(|spec| match state.cache.get(&spec.id) {
            Some(cached) => json!({
                "dataset": spec.id,
                "available": true,
                "stale": cached.stale,
                "fetched_at": cached.snapshot.fetched_at,
            }),
            None => json!({
                "dataset": spec.id,
                "available": false,
            }),
        })
        .collect();

    Json(json!({ "datasets": datasets }))
}

/// Serves whatever the cache holds. Stale data is flagged, not an error; a
/// dataset awaiting its first refresh returns `data: null`.
async fn get_market(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.config.market.datasets.iter().any(|d| d.id == dataset) {
        return Err(ApiError::NotFound(format!("unknown dataset {dataset}")));
    }

    let body = match state.cache.get(&dataset) {
        Some(cached) => json!({
            "dataset": dataset,
            "data": cached.snapshot.payload,
            "source": cached.snapshot.source,
            "fetched_at": cached.snapshot.fetched_at,
            "stale": cached.stale,
        }),
        None => json!({
            "dataset": dataset,
            "data": Value::Null,
            "stale": Value::Null,
            "detail": "awaiting first refresh",
        }),
    };

    Ok(Json(body))
}
