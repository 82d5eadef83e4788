//! `POST/GET /v1/events`, `GET /v1/events/{id}`, `GET
//! /v1/dashboard/events` (cursor pagination), and `POST
//! /v1/webhooks/{event_type}` (§6).

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use relayhive_schema::Event;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_events).post(emit_event))
        .route("/{id}", get(get_event))
}

/// Mounted separately at `/v1/dashboard/events`.
pub fn dashboard_router() -> Router<AppState> {
    Router::new().route("/", get(list_events_after))
}

/// Mounted separately at `/v1/webhooks/{event_type}`.
pub fn webhooks_router() -> Router<AppState> {
    Router::new().route("/{event_type}", post(emit_webhook))
}

#[derive(Deserialize)]
struct EmitEventBody {
    event_type: String,
    source: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    idempotency_key: Option<String>,
}

#[derive(Serialize)]
struct EmitEventResponse {
    event_id: String,
    matched_rules: usize,
}

async fn emit_event(State(state): State<AppState>, Json(body): Json<EmitEventBody>) -> ApiResult<Json<EmitEventResponse>> {
    if body.event_type.trim().is_empty() {
        return Err(ApiError::invalid_input("event_type is required"));
    }
    let mut event = Event::new(body.event_type, body.source).with_payload(body.payload);
    if let Some(subject) = body.subject {
        event = event.with_subject(subject);
    }
    if let Some(key) = body.idempotency_key {
        event = event.with_idempotency_key(key);
    }
    let event_id = event.event_id.clone();
    let outcomes = state.engine.emit(event).await;
    Ok(Json(EmitEventResponse {
        event_id,
        matched_rules: outcomes.len(),
    }))
}

/// Wraps an arbitrary webhook body as the payload of an event whose type
/// is taken from the path (§6: "Emit a wrapped event (body becomes
/// payload)").
async fn emit_webhook(
    State(state): State<AppState>,
    Path(event_type): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<EmitEventResponse>> {
    let event = Event::new(event_type, "webhook").with_payload(body);
    let event_id = event.event_id.clone();
    let outcomes = state.engine.emit(event).await;
    Ok(Json(EmitEventResponse {
        event_id,
        matched_rules: outcomes.len(),
    }))
}

#[derive(Deserialize)]
struct ListEventsQuery {
    event_type: Option<String>,
    limit: Option<i64>,
}

async fn list_events(State(state): State<AppState>, Query(query): Query<ListEventsQuery>) -> ApiResult<Json<Vec<Event>>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let events = state.engine.list_events(limit, query.event_type, None).await?;
    Ok(Json(events))
}

async fn get_event(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Event>> {
    match state.engine.store().get(&id).await? {
        Some(event) => Ok(Json(event)),
        None => Err(ApiError::not_found(format!("event {id} not found"))),
    }
}

#[derive(Deserialize)]
struct DashboardEventsQuery {
    event_type: Option<String>,
    limit: Option<i64>,
    resume_from: Option<String>,
}

#[derive(Serialize)]
struct DashboardEventsResponse {
    items: Vec<Event>,
    next_cursor: Option<String>,
}

/// Opaque cursor: `<rfc3339 timestamp>|<event_id>`. Not cryptographically
/// hidden — "opaque" here means callers must treat it as an unparsed
/// token, not that it needs to resist inspection.
fn encode_cursor(timestamp: DateTime<Utc>, event_id: &str) -> String {
    format!("{}|{}", timestamp.to_rfc3339(), event_id)
}

fn decode_cursor(raw: &str) -> ApiResult<(DateTime<Utc>, String)> {
    let (ts, id) = raw
        .split_once('|')
        .ok_or_else(|| ApiError::invalid_input("malformed resume_from cursor"))?;
    let timestamp = DateTime::parse_from_rfc3339(ts)
        .map_err(|_| ApiError::invalid_input("malformed resume_from cursor"))?
        .with_timezone(&Utc);
    Ok((timestamp, id.to_string()))
}

async fn list_events_after(
    State(state): State<AppState>,
    Query(query): Query<DashboardEventsQuery>,
) -> ApiResult<Json<DashboardEventsResponse>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let cursor = query.resume_from.as_deref().map(decode_cursor).transpose()?;
    let items = state.engine.list_events_after(cursor, limit, query.event_type, None).await?;
    let next_cursor = items.last().map(|e| encode_cursor(e.timestamp, &e.event_id));
    Ok(Json(DashboardEventsResponse { items, next_cursor }))
}
