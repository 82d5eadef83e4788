//! `POST /v1/integrations/telegram/webhook`, `POST
//! /v1/integrations/feishu/events`, `POST
//! /v1/integrations/feishu/card-actions`, and `POST
//! /v1/integrations/{provider}/outbound/test` (§4.12, §6).

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use relayhive_gateway::WebhookOutcome;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/telegram/webhook", post(telegram_webhook))
        .route("/feishu/events", post(feishu_events))
        .route("/feishu/card-actions", post(feishu_card_actions))
        .route("/{provider}/outbound/test", post(outbound_test))
}

async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<WebhookOutcome>> {
    let secret = headers.get(TELEGRAM_SECRET_HEADER).and_then(|v| v.to_str().ok());
    let outcome = state.gateway.ingest_telegram_webhook(body, secret).await?;
    Ok(Json(outcome))
}

async fn feishu_events(State(state): State<AppState>, Json(body): Json<serde_json::Value>) -> ApiResult<Json<serde_json::Value>> {
    let outcome = state.gateway.ingest_feishu_events(body).await?;
    if let WebhookOutcome::Challenge { challenge } = &outcome {
        return Ok(Json(serde_json::json!({ "challenge": challenge })));
    }
    Ok(Json(serde_json::to_value(outcome).unwrap_or(serde_json::Value::Null)))
}

async fn feishu_card_actions(State(state): State<AppState>, Json(body): Json<serde_json::Value>) -> ApiResult<Json<WebhookOutcome>> {
    let outcome = state.gateway.ingest_feishu_card_actions(body).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct OutboundTestBody {
    #[serde(default)]
    chat_id: Option<String>,
    #[serde(default = "default_test_text")]
    text: String,
}

fn default_test_text() -> String {
    "this is a test message from relayhive".to_string()
}

async fn outbound_test(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(body): Json<OutboundTestBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state.gateway.send_outbound_test(&provider, body.chat_id, &body.text).await?;
    Ok(Json(serde_json::json!({ "sent": true })))
}
