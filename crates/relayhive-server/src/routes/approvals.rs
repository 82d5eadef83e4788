//! `GET /v1/approvals`, `POST /v1/approvals/{id}/resolve` (§6).

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use relayhive_schema::{ApprovalRequest, ApprovalStatus};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_approvals))
        .route("/{id}/resolve", post(resolve_approval))
}

#[derive(Deserialize)]
struct ListApprovalsQuery {
    status: Option<String>,
    limit: Option<i64>,
}

async fn list_approvals(
    State(state): State<AppState>,
    Query(query): Query<ListApprovalsQuery>,
) -> ApiResult<Json<Vec<ApprovalRequest>>> {
    let status = query.status.as_deref().map(ApprovalStatus::parse);
    let approvals = state.engine.list_approvals(status, query.limit).await?;
    Ok(Json(approvals))
}

#[derive(Deserialize)]
struct ResolveApprovalBody {
    decision: String,
}

#[derive(Serialize)]
struct ResolveApprovalResponse {
    resolved: bool,
    status: String,
}

async fn resolve_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResolveApprovalBody>,
) -> ApiResult<Json<ResolveApprovalResponse>> {
    let approve = match body.decision.as_str() {
        "approved" => true,
        "rejected" => false,
        other => return Err(ApiError::invalid_input(format!("unknown decision: {other}"))),
    };
    let resolution = state.engine.resolve_approval(&id, approve).await?;
    if !resolution.resolved {
        // `resolved: false` with a still-`pending` status means the approval
        // manager never found the row (an unknown id is never left pending
        // after a successful resolve); any other status means it was already
        // terminal when this call arrived.
        return Err(if resolution.status == ApprovalStatus::Pending {
            ApiError::from(relayhive_schema::EngineError::NotFound(format!("approval {id}")))
        } else {
            ApiError::from(relayhive_schema::EngineError::Conflict(format!(
                "approval {id} already resolved as {}",
                resolution.status
            )))
        });
    }
    Ok(Json(ResolveApprovalResponse {
        resolved: resolution.resolved,
        status: resolution.status.to_string(),
    }))
}
