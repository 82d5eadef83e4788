//! Axum HTTP surface over `EventEngine`/`GatewayManager` (§6). Every
//! route is a thin adapter: parse the request, call the core, map the
//! result or `EngineError` onto the documented response/status shape.

pub mod error;
pub mod routes;
pub mod state;

use anyhow::Result;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::api_router()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: &str) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("relayhive-server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
