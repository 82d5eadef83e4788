//! Per-conversation gateway layer (§4.11, §4.12): addressing policy,
//! isolated task-run ingest, per-provider runtime config, and the thin
//! service facade the HTTP layer calls into.

mod addressing;
mod config_store;
mod context_service;
mod manager;

pub use addressing::{continuation_hit, decide_addressing};
pub use config_store::RuntimeConfigStore;
pub use context_service::{GatewayContextService, IngestOutcome, OnResult};
pub use manager::{parse_text_approval_command, GatewayManager, TextApprovalCommand, WebhookOutcome};
