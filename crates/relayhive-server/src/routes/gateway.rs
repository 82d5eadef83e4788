//! `GET /v1/gateway/conversations`, `GET
//! /v1/gateway/conversations/{id}/runs`, `GET
//! /v1/gateway/conversations/{id}/context` (§6).

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use relayhive_schema::{GatewayContextMessage, GatewayConversation, GatewayTaskRun};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/conversations", get(list_conversations))
        .route("/conversations/{id}/runs", get(list_conversation_runs))
        .route("/conversations/{id}/context", get(conversation_context))
}

#[derive(Deserialize)]
struct ListConversationsQuery {
    provider: Option<String>,
    limit: Option<i64>,
}

async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListConversationsQuery>,
) -> ApiResult<Json<Vec<GatewayConversation>>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let conversations = state.gateway.list_conversations(query.provider, limit).await?;
    Ok(Json(conversations))
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

async fn list_conversation_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<GatewayTaskRun>>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let runs = state.gateway.list_conversation_runs(&id, limit).await?;
    Ok(Json(runs))
}

async fn conversation_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<GatewayContextMessage>>> {
    let limit = query.limit.unwrap_or(200).clamp(1, 1000);
    let messages = state.gateway.conversation_context(&id, limit).await?;
    Ok(Json(messages))
}
