//! Core event-processing engine: rule matching, governance, action
//! routing, approvals, replay, and periodic triggers.

mod approval_manager;
mod config;
mod engine;
mod replay;
mod router;
mod rules_engine;
mod scheduler;

pub use approval_manager::ApprovalManager;
pub use config::RuntimeConfig;
pub use engine::{ensure_rules_path, EventEngine};
pub use replay::ReplayManager;
pub use router::{ActionExecutor, AgentDispatcher, EventRouter, NoopAgentDispatcher, NoopNotificationSink, NotificationSink};
pub use rules_engine::RulesEngine;
pub use scheduler::{parse_schedule_to_interval_seconds, CronJobSpec, TriggerScheduler};
