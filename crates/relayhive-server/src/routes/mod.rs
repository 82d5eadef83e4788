pub mod approvals;
pub mod config;
pub mod dashboard;
pub mod events;
pub mod gateway;
pub mod integrations;

use axum::Router;

use crate::state::AppState;

/// Mounts the full `/v1/...` surface from §6.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/v1/events", events::router())
        .nest("/v1/dashboard/events", events::dashboard_router())
        .nest("/v1/approvals", approvals::router())
        .nest("/v1/dashboard/rule-runs", dashboard::rule_runs_router())
        .nest("/v1/metrics/events", dashboard::metrics_router())
        .nest("/v1/dashboard/summary", dashboard::summary_router())
        .nest("/v1/dashboard/live", dashboard::live_router())
        .nest("/v1/webhooks", events::webhooks_router())
        .nest("/v1/integrations", integrations::router())
        .nest("/v1/config/gateways", config::router())
        .nest("/v1/gateway", gateway::router())
}
