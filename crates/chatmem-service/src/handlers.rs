//! Route handlers. Each chat endpoint runs its retrieval mode, then
//! publishes the exchange onto both per-user queues so the memory and log
//! workers pick it up asynchronously — the request itself never waits on
//! the write path.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub user_input: String,
}

pub async fn root() -> impl IntoResponse {
    Json(json!({ "status": "chat service running" }))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.user_id.trim().is_empty() {
        return Err(crate::error::ApiError::bad_request("user_id is required"));
    }
    let summary = state.session.login(&req.user_id).await?;
    Ok(Json(json!({
        "status": "logged_in",
        "memories_loaded": summary.memories_loaded,
        "chats_loaded": summary.chats_loaded,
    })))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.user_id.trim().is_empty() {
        return Err(crate::error::ApiError::bad_request("user_id is required"));
    }
    let summary = state.session.logout(&req.user_id).await?;
    Ok(Json(json!({
        "status": "logged_out",
        "memories_synced": summary.memories_synced,
        "chats_synced": summary.chats_synced,
    })))
}

/// Publication is fire-and-log from the worker's perspective, but the
/// turn is not durable until both queues have the exchange — so a publish
/// failure here surfaces as a 5xx rather than being swallowed, and the
/// handler does not return until both publishes have completed.
async fn publish_exchange(state: &AppState, user_id: &str, user_input: &str, response: &str) -> ApiResult<()> {
    chatmem_pipeline::publish_to_both_queues(&state.channel, user_id, user_input, response)
        .await
        .map_err(|e| {
            tracing::error!(user_id, error = %e, "failed to publish exchange onto work queues");
            crate::error::ApiError::internal(format!("failed to publish exchange: {e}"))
        })
}

pub async fn chat_semantic(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let resp = state.engine.chat_semantic(&req.user_id, &req.user_input).await?;
    publish_exchange(&state, &req.user_id, &req.user_input, &resp.response).await?;
    Ok(Json(resp))
}

pub async fn chat_rfm(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let resp = state.engine.chat_rfm(&req.user_id, &req.user_input).await?;
    publish_exchange(&state, &req.user_id, &req.user_input, &resp.response).await?;
    Ok(Json(resp))
}

pub async fn chat_rfm_semantic(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let resp = state.engine.chat_rfm_semantic(&req.user_id, &req.user_input).await?;
    publish_exchange(&state, &req.user_id, &req.user_input, &resp.response).await?;
    Ok(Json(resp))
}
