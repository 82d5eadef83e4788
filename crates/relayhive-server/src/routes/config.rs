//! `GET/PUT /v1/config/gateways[/{provider}]` (§4.12, §6).

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use relayhive_schema::GatewayConfig;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_gateway_configs))
        .route("/{provider}", get(get_gateway_config).put(put_gateway_config))
}

async fn list_gateway_configs(State(state): State<AppState>) -> Json<Vec<GatewayConfig>> {
    Json(state.gateway.list_gateway_configs().await)
}

async fn get_gateway_config(State(state): State<AppState>, Path(provider): Path<String>) -> ApiResult<Json<GatewayConfig>> {
    let config = state.gateway.get_gateway_config(&provider).await?;
    Ok(Json(config))
}

async fn put_gateway_config(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(mut body): Json<GatewayConfig>,
) -> ApiResult<Json<GatewayConfig>> {
    body.provider = provider;
    let saved = state.gateway.upsert_gateway_config(body).await?;
    Ok(Json(saved))
}
