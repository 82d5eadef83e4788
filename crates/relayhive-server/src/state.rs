use std::sync::Arc;

use relayhive_engine::EventEngine;
use relayhive_gateway::GatewayManager;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<EventEngine>,
    pub gateway: Arc<GatewayManager>,
}
