//! `GET /v1/dashboard/rule-runs`, `GET /v1/metrics/events`, `GET
//! /v1/dashboard/summary`, and the `GET /v1/dashboard/live` SSE stream
//! (§6).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures_core::Stream;
use relayhive_schema::{EventMetrics, RuleRun, RuleRunStatus};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::state::AppState;

pub fn rule_runs_router() -> Router<AppState> {
    Router::new().route("/", get(list_rule_runs))
}

pub fn metrics_router() -> Router<AppState> {
    Router::new().route("/", get(get_metrics))
}

pub fn summary_router() -> Router<AppState> {
    Router::new().route("/", get(dashboard_summary))
}

pub fn live_router() -> Router<AppState> {
    Router::new().route("/", get(dashboard_live))
}

#[derive(Deserialize)]
struct RuleRunsQuery {
    rule_id: Option<String>,
    event_id: Option<String>,
    status: Option<String>,
    limit: Option<i64>,
}

async fn list_rule_runs(State(state): State<AppState>, Query(query): Query<RuleRunsQuery>) -> ApiResult<Json<Vec<RuleRun>>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let status = query.status.as_deref().map(RuleRunStatus::parse);
    let runs = state.engine.list_rule_runs(query.rule_id, query.event_id, status, limit).await?;
    Ok(Json(runs))
}

async fn get_metrics(State(state): State<AppState>) -> ApiResult<Json<EventMetrics>> {
    let metrics = state.engine.metrics(None).await?;
    Ok(Json(metrics))
}

#[derive(Serialize)]
struct DashboardSummary {
    metrics: EventMetrics,
    pending_approvals: usize,
    active_rules: usize,
    recent_events: usize,
}

async fn dashboard_summary(State(state): State<AppState>) -> ApiResult<Json<DashboardSummary>> {
    let metrics = state.engine.metrics(None).await?;
    let pending = state.engine.list_pending_approvals().await?;
    let rules = state.engine.list_rules().await;
    let recent = state.engine.list_events(50, None, None).await?;
    Ok(Json(DashboardSummary {
        metrics,
        pending_approvals: pending.len(),
        active_rules: rules.iter().filter(|r| r.is_active).count(),
        recent_events: recent.len(),
    }))
}

#[derive(Deserialize)]
struct LiveQuery {
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default = "default_interval_ms")]
    interval: u64,
    max_ticks: Option<u64>,
    #[allow(dead_code)]
    channels: Option<String>,
    event_type: Option<String>,
    #[allow(dead_code)]
    resume_from: Option<String>,
}

fn default_mode() -> String {
    "snapshot".to_string()
}

fn default_interval_ms() -> u64 {
    1000
}

/// Server-sent stream of snapshot/delta ticks. `mode = snapshot` emits
/// the full dashboard summary each tick; `delta` emits only events
/// appended since the previous tick; `snapshot_delta` emits both kinds
/// on alternating ticks. Every tick's JSON object carries `stream_mode`
/// so a consumer can tell which shape it got without inspecting fields.
async fn dashboard_live(
    State(state): State<AppState>,
    Query(query): Query<LiveQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = async_stream::stream! {
        let mut interval = tokio::time::interval(Duration::from_millis(query.interval.max(50)));
        let mut ticks: u64 = 0;
        let mut last_event_id: Option<String> = None;

        loop {
            interval.tick().await;
            if let Some(max) = query.max_ticks {
                if ticks >= max {
                    break;
                }
            }
            ticks += 1;

            let emit_snapshot = query.mode != "delta" && (query.mode != "snapshot_delta" || ticks % 2 == 1);

            if emit_snapshot {
                if let Ok(metrics) = state.engine.metrics(None).await {
                    let pending = state.engine.list_pending_approvals().await.unwrap_or_default();
                    let payload = serde_json::json!({
                        "stream_mode": "snapshot",
                        "metrics": metrics,
                        "pending_approvals": pending.len(),
                    });
                    if let Ok(json) = serde_json::to_string(&payload) {
                        yield Ok(SseEvent::default().data(json));
                    }
                }
            } else if let Ok(events) = state
                .engine
                .list_events(50, query.event_type.clone(), None)
                .await
            {
                let fresh: Vec<_> = match &last_event_id {
                    Some(last) => events.iter().take_while(|e| &e.event_id != last).cloned().collect(),
                    None => events.clone(),
                };
                if let Some(first) = events.first() {
                    last_event_id = Some(first.event_id.clone());
                }
                let payload = serde_json::json!({
                    "stream_mode": "delta",
                    "events": fresh,
                });
                if let Ok(json) = serde_json::to_string(&payload) {
                    yield Ok(SseEvent::default().data(json));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
