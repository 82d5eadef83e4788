//! Core data model shared by every component of the event engine:
//! events, rules, rule-runs, approvals, and the error taxonomy used
//! to propagate failures across the engine/gateway boundary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Risk classification carried on events and rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        };
        f.write_str(s)
    }
}

impl Default for RiskLevel {
    fn default() -> Self {
        RiskLevel::Low
    }
}

impl RiskLevel {
    pub fn parse(s: &str) -> Self {
        match s {
            "medium" => RiskLevel::Medium,
            "high" => RiskLevel::High,
            _ => RiskLevel::Low,
        }
    }
}

/// Governance outcome for a (rule, event) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionMode {
    Skip,
    Ask,
    Suggest,
    Auto,
}

impl fmt::Display for ActionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionMode::Skip => "skip",
            ActionMode::Ask => "ask",
            ActionMode::Suggest => "suggest",
            ActionMode::Auto => "auto",
        };
        f.write_str(s)
    }
}

impl ActionMode {
    pub fn parse_or_suggest(s: &str) -> Self {
        match s {
            "skip" => ActionMode::Skip,
            "ask" => ActionMode::Ask,
            "auto" => ActionMode::Auto,
            _ => ActionMode::Suggest,
        }
    }
}

/// An immutable, typed message persisted in the event store and
/// published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_type: String,
    pub source: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub risk_hint: Option<RiskLevel>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_id: format!("evt_{}", Uuid::new_v4().simple()),
            event_type: event_type.into(),
            source: source.into(),
            subject: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
            idempotency_key: None,
            risk_hint: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_risk_hint(mut self, hint: RiskLevel) -> Self {
        self.risk_hint = Some(hint);
        self
    }
}

/// One action attached to a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleAction {
    pub action_type: ActionType,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Closed sum type for dispatchable action kinds (see design notes:
/// no runtime plugin registry, extend the enum instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Notify,
    RunAgent,
    ExecutePlan,
    CallWebhook,
    LogOnly,
}

/// Declarative rule definition loaded from a rule file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRule {
    pub id: String,
    pub name: String,
    pub event_type: String,
    #[serde(default = "default_conditions")]
    pub conditions: serde_json::Value,
    #[serde(default = "default_action_mode")]
    pub action_mode: ActionMode,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub dedupe_window_seconds: i64,
    #[serde(default)]
    pub cooldown_seconds: i64,
    #[serde(default)]
    pub attention_budget_per_day: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_conditions() -> serde_json::Value {
    serde_json::json!({"all": []})
}

fn default_action_mode() -> ActionMode {
    ActionMode::Auto
}

fn default_true() -> bool {
    true
}

impl EventRule {
    pub fn matches_event_type(&self, event_type: &str) -> bool {
        self.event_type == event_type || self.event_type == "*"
    }
}

/// Transient decision for one (rule, event) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDecision {
    pub decision: ActionMode,
    pub reason: String,
    pub rule_id: String,
}

/// Terminal/transient status of a rule-run row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleRunStatus {
    Running,
    Completed,
    Skipped,
    Partial,
    Failed,
    AwaitingApproval,
}

impl fmt::Display for RuleRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuleRunStatus::Running => "running",
            RuleRunStatus::Completed => "completed",
            RuleRunStatus::Skipped => "skipped",
            RuleRunStatus::Partial => "partial",
            RuleRunStatus::Failed => "failed",
            RuleRunStatus::AwaitingApproval => "awaiting_approval",
        };
        f.write_str(s)
    }
}

impl RuleRunStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => RuleRunStatus::Completed,
            "skipped" => RuleRunStatus::Skipped,
            "partial" => RuleRunStatus::Partial,
            "failed" => RuleRunStatus::Failed,
            "awaiting_approval" => RuleRunStatus::AwaitingApproval,
            _ => RuleRunStatus::Running,
        }
    }
}

/// Persistent execution record for a (rule, event) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRun {
    pub run_id: String,
    pub rule_id: String,
    pub event_id: String,
    pub decision: ActionMode,
    pub reason: String,
    pub status: RuleRunStatus,
    #[serde(default)]
    pub action_trace_id: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl RuleRun {
    pub fn new_running(rule_id: impl Into<String>, event_id: impl Into<String>, decision: &RuleDecision) -> Self {
        Self {
            run_id: format!("run_{}", Uuid::new_v4().simple()),
            rule_id: rule_id.into(),
            event_id: event_id.into(),
            decision: decision.decision,
            reason: decision.reason.clone(),
            status: RuleRunStatus::Running,
            action_trace_id: None,
            duration_ms: None,
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle status of a human-approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl ApprovalStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "approved" => ApprovalStatus::Approved,
            "rejected" => ApprovalStatus::Rejected,
            _ => ApprovalStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

/// A human-in-the-loop approval gate created when a rule's decision is `ask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approval_id: String,
    pub rule_id: String,
    pub event_id: String,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub context: serde_json::Value,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Outcome of `ApprovalManager::resolve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResolution {
    pub resolved: bool,
    pub status: ApprovalStatus,
}

/// Aggregated routing outcome for one rule's actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteReport {
    pub trace_id: String,
    pub executed: u32,
    pub failed: u32,
    pub errors: Vec<String>,
}

/// Metrics snapshot returned by `EventStore::get_metrics`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetrics {
    pub events_total: i64,
    pub rule_runs_total: i64,
    pub rule_runs_completed: i64,
    pub approvals_total: i64,
    pub approvals_pending: i64,
}

/// The closed error taxonomy the core distinguishes (§7). Every
/// engine-level crate returns this type; `anyhow` takes over at the
/// CLI/server binary boundary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("duplicate event for idempotency key")]
    DuplicateEvent,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// One execution outcome for a (rule, event) pair, returned up through
/// `RulesEngine::handle_event` and `EventEngine::emit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleExecutionResult {
    pub run_id: String,
    pub rule_id: String,
    pub event_id: String,
    pub decision: ActionMode,
    pub status: RuleRunStatus,
    pub reason: String,
    #[serde(default)]
    pub approval_id: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// A durable, per-provider/per-chat conversation. `gateway_key` is the
/// unique `provider:bot_id:chat_id` addressing triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConversation {
    pub id: String,
    pub provider: String,
    pub gateway_key: String,
    pub bot_id: String,
    pub chat_id: String,
    pub main_context_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Role of one message in a conversation's append-ordered context log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        f.write_str(s)
    }
}

impl MessageRole {
    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => MessageRole::Assistant,
            _ => MessageRole::User,
        }
    }
}

/// One append in a conversation's context log. `context_version` is
/// monotonic per conversation and never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayContextMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub context_version: i64,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of one isolated task-runner execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskRunStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl fmt::Display for TaskRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskRunStatus::Queued => "queued",
            TaskRunStatus::Running => "running",
            TaskRunStatus::Done => "done",
            TaskRunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl TaskRunStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "running" => TaskRunStatus::Running,
            "done" => TaskRunStatus::Done,
            "failed" => TaskRunStatus::Failed,
            _ => TaskRunStatus::Queued,
        }
    }
}

/// One isolated execution of the external task runner, tied to the
/// user message that triggered it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayTaskRun {
    pub id: String,
    pub conversation_id: String,
    pub runtime_session_id: String,
    pub source_message_id: String,
    pub snapshot_version: i64,
    pub status: TaskRunStatus,
    #[serde(default)]
    pub result_summary: Option<String>,
    #[serde(default)]
    pub result_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-provider policy deciding whether an inbound message addresses the
/// bot and, if so, whether it should trigger task execution (§4.11.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressingPolicy {
    pub mode: AddressingMode,
    #[serde(default = "default_true")]
    pub allow_reply_to_bot: bool,
    #[serde(default)]
    pub execute_on_unaddressed: bool,
    #[serde(default = "default_command_prefixes")]
    pub command_prefixes: Vec<String>,
    #[serde(default = "default_continuation_window")]
    pub session_continuation_window_sec: i64,
}

fn default_command_prefixes() -> Vec<String> {
    vec![
        "/ask".to_string(),
        "/run".to_string(),
        "/approve".to_string(),
        "/reject".to_string(),
    ]
}

fn default_continuation_window() -> i64 {
    300
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressingMode {
    AllMessages,
    MentionOnly,
}

impl AddressingPolicy {
    pub fn default_for_provider(provider: &str) -> Self {
        let mode = if provider == "telegram" {
            AddressingMode::AllMessages
        } else {
            AddressingMode::MentionOnly
        };
        Self {
            mode,
            allow_reply_to_bot: true,
            execute_on_unaddressed: false,
            command_prefixes: default_command_prefixes(),
            session_continuation_window_sec: default_continuation_window(),
        }
    }
}

/// Outcome of `decide_addressing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressingDecision {
    pub addressed: bool,
    pub should_execute: bool,
    pub reason: String,
}

/// Per-provider gateway configuration, persisted as JSON by
/// `RuntimeConfigStore` rather than in the relational store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub provider: String,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub app_secret: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub default_chat_id: Option<String>,
    #[serde(default)]
    pub addressing_policy: Option<AddressingPolicy>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Request handed to the external `TaskRunner` (out of scope — see §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRunRequest {
    pub task: String,
    pub db_path: String,
    pub rules_path: String,
    pub agent_id: String,
    pub session_id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Result handed back by the external `TaskRunner`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRunOutcome {
    #[serde(default)]
    pub final_response: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub runtime_events: Vec<serde_json::Value>,
    #[serde(default)]
    pub tool_results: Vec<serde_json::Value>,
}
