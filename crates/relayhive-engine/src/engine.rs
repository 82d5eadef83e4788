//! Composition root wiring `EventStore`, `EventBus`, `RulesEngine`,
//! `EventRouter`, `ApprovalManager`, `ReplayManager`, and
//! `TriggerScheduler` into the single facade callers interact with
//! (§4.9, grounded on the source's `EventEngine`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use relayhive_bus::EventBus;
use relayhive_rules::{ensure_default_rules, list_rule_files, load_rules};
use relayhive_schema::{ApprovalRequest, ApprovalResolution, Event, EventMetrics, EventRule, RuleExecutionResult, RuleRun};
use relayhive_store::EventStore;
use tokio::sync::{Mutex, RwLock};

use crate::approval_manager::ApprovalManager;
use crate::replay::ReplayManager;
use crate::router::EventRouter;
use crate::rules_engine::RulesEngine;
use crate::scheduler::{CronJobSpec, TriggerScheduler};

/// `EventEngine` owns the bus's single subscriber slot; a second
/// subscriber anywhere else in the process is a configuration error.
pub struct EventEngine {
    store: Arc<EventStore>,
    bus: Arc<EventBus<Vec<RuleExecutionResult>>>,
    rules_engine: Arc<RulesEngine>,
    approval_manager: Arc<ApprovalManager>,
    replay_manager: ReplayManager,
    trigger_scheduler: TriggerScheduler,
    rules_path: Option<PathBuf>,
    rule_files_mtime: RwLock<HashMap<PathBuf, i128>>,
    rule_watch_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl EventEngine {
    /// Builds the facade with an explicit router (e.g. one wired with a
    /// real notification sink / agent dispatcher) and optional rules path.
    /// The approval manager's `approval.*` follow-up events are wired to
    /// re-enter this same bus before the bus gets its one subscriber, so
    /// an approval resolution re-triggers rule matching exactly like any
    /// other event.
    pub async fn build(store: Arc<EventStore>, router: Arc<EventRouter>, rules_path: Option<PathBuf>) -> Arc<Self> {
        let bus: Arc<EventBus<Vec<RuleExecutionResult>>> = Arc::new(EventBus::new());

        let initial_rules = match &rules_path {
            Some(path) => load_rules(path),
            None => Vec::new(),
        };

        let bus_for_approval = bus.clone();
        let approval_manager = Arc::new(ApprovalManager::new(store.clone()).with_emit(move |event| {
            let bus = bus_for_approval.clone();
            async move {
                bus.emit(event).await;
            }
        }));

        let rules_engine = Arc::new(RulesEngine::new(store.clone(), router, Some(approval_manager.clone())));
        rules_engine.set_rules(initial_rules).await;

        let replay_manager = ReplayManager::new(store.clone(), rules_engine.clone());

        let bus_for_trigger = bus.clone();
        let trigger_scheduler = TriggerScheduler::new(move |event| {
            let bus = bus_for_trigger.clone();
            async move {
                bus.emit(event).await;
            }
        });

        let engine = Arc::new(Self {
            store,
            bus: bus.clone(),
            rules_engine: rules_engine.clone(),
            approval_manager,
            replay_manager,
            trigger_scheduler,
            rules_path,
            rule_files_mtime: RwLock::new(HashMap::new()),
            rule_watch_task: Mutex::new(None),
        });

        let rules_engine_for_bus = rules_engine;
        bus.subscribe(move |event| {
            let rules_engine = rules_engine_for_bus.clone();
            async move { rules_engine.handle_event(event, true).await.unwrap_or_default() }
        })
        .await
        .expect("EventEngine registers the bus's only subscriber during construction");

        engine.refresh_rule_files_snapshot().await;
        engine
    }

    /// Emits an event through the bus, reloading rules first if the rule
    /// files changed on disk since the last check.
    pub async fn emit(&self, event: Event) -> Vec<RuleExecutionResult> {
        self.reload_rules_if_changed().await;
        self.bus.emit(event).await.unwrap_or_default()
    }

    pub async fn set_rules(&self, rules: Vec<EventRule>) {
        self.rules_engine.set_rules(rules).await;
    }

    pub async fn add_rule(&self, rule: EventRule) {
        self.rules_engine.add_rule(rule).await;
    }

    pub async fn reload_rules(&self) -> usize {
        let Some(path) = &self.rules_path else {
            return self.rules_engine.list_rules().await.len();
        };
        let rules = load_rules(path);
        let count = rules.len();
        self.rules_engine.set_rules(rules).await;
        self.refresh_rule_files_snapshot().await;
        count
    }

    pub async fn reload_rules_if_changed(&self) -> bool {
        let Some(path) = &self.rules_path else {
            return false;
        };
        let current = capture_rule_files_mtime(path);
        let changed = *self.rule_files_mtime.read().await != current;
        if changed {
            self.reload_rules().await;
        }
        changed
    }

    async fn refresh_rule_files_snapshot(&self) {
        let Some(path) = &self.rules_path else { return };
        let snapshot = capture_rule_files_mtime(path);
        *self.rule_files_mtime.write().await = snapshot;
    }

    pub async fn list_rules(&self) -> Vec<EventRule> {
        self.reload_rules_if_changed().await;
        self.rules_engine.list_rules().await
    }

    pub async fn list_events(
        &self,
        limit: i64,
        event_type: Option<String>,
        event_types: Option<Vec<String>>,
    ) -> relayhive_schema::EngineResult<Vec<Event>> {
        self.store.list_events(limit, event_type, event_types).await
    }

    pub async fn list_events_after(
        &self,
        cursor: Option<(DateTime<Utc>, String)>,
        limit: i64,
        event_type: Option<String>,
        event_types: Option<Vec<String>>,
    ) -> relayhive_schema::EngineResult<Vec<Event>> {
        self.store.list_events_after(cursor, limit, event_type, event_types).await
    }

    pub async fn list_pending_approvals(&self) -> relayhive_schema::EngineResult<Vec<ApprovalRequest>> {
        self.approval_manager.list_pending().await
    }

    pub async fn list_approvals(
        &self,
        status: Option<relayhive_schema::ApprovalStatus>,
        limit: Option<i64>,
    ) -> relayhive_schema::EngineResult<Vec<ApprovalRequest>> {
        self.store.list_approvals(status, limit).await
    }

    pub async fn list_rule_runs(
        &self,
        rule_id: Option<String>,
        event_id: Option<String>,
        status: Option<relayhive_schema::RuleRunStatus>,
        limit: i64,
    ) -> relayhive_schema::EngineResult<Vec<RuleRun>> {
        self.store.list_rule_runs(rule_id, event_id, status, limit).await
    }

    pub async fn metrics(&self, since: Option<DateTime<Utc>>) -> relayhive_schema::EngineResult<EventMetrics> {
        self.store.get_metrics(since).await
    }

    pub async fn resolve_approval(&self, approval_id: &str, approve: bool) -> relayhive_schema::EngineResult<ApprovalResolution> {
        self.approval_manager.resolve(approval_id, approve).await
    }

    pub async fn replay_event(&self, event_id: &str, bypass_dedup: bool) -> relayhive_schema::EngineResult<Vec<RuleExecutionResult>> {
        self.replay_manager.replay_event(event_id, bypass_dedup).await
    }

    pub async fn replay_by_type(&self, event_type: &str, since: DateTime<Utc>) -> relayhive_schema::EngineResult<usize> {
        self.replay_manager.replay_by_type(event_type, since).await
    }

    pub async fn start_heartbeat(&self, interval_seconds: f64) -> bool {
        self.trigger_scheduler
            .start_heartbeat(interval_seconds, "health.heartbeat.tick", "system.heartbeat", Some("system".to_string()), serde_json::json!({}))
            .await
    }

    pub async fn start_cron_jobs(&self, jobs: Vec<CronJobSpec>) -> usize {
        self.trigger_scheduler.start_cron_jobs(jobs).await
    }

    pub async fn stop_triggers(&self) {
        self.trigger_scheduler.stop().await;
    }

    /// Starts a background poll loop that reloads rules when their files
    /// change on disk. A no-op if already running.
    pub async fn start_rule_watch(self: &Arc<Self>, poll_interval: std::time::Duration) {
        let mut guard = self.rule_watch_task.lock().await;
        if guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval.max(std::time::Duration::from_millis(100))).await;
                engine.reload_rules_if_changed().await;
            }
        });
        *guard = Some(handle);
    }

    pub async fn stop_rule_watch(&self) {
        if let Some(handle) = self.rule_watch_task.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    pub fn store(&self) -> Arc<EventStore> {
        self.store.clone()
    }
}

fn capture_rule_files_mtime(path: &Path) -> HashMap<PathBuf, i128> {
    list_rule_files(path)
        .into_iter()
        .filter_map(|file| {
            let modified = std::fs::metadata(&file).ok()?.modified().ok()?;
            let nanos = modified.duration_since(std::time::UNIX_EPOCH).ok()?.as_nanos() as i128;
            Some((file, nanos))
        })
        .collect()
}

/// Ensures a seed rules directory exists before the first `build` call.
pub fn ensure_rules_path(path: &Path) -> anyhow::Result<()> {
    ensure_default_rules(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayhive_schema::{ActionMode, ActionType, RiskLevel, RuleAction};

    async fn engine_with_rule(rule: EventRule) -> Arc<EventEngine> {
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        let router = Arc::new(EventRouter::noop());
        let engine = EventEngine::build(store, router, None).await;
        engine.set_rules(vec![rule]).await;
        engine
    }

    fn notify_rule(event_type: &str, risk: RiskLevel) -> EventRule {
        EventRule {
            id: format!("rule_{event_type}"),
            name: format!("rule_{event_type}"),
            event_type: event_type.to_string(),
            conditions: serde_json::json!({"all": []}),
            action_mode: ActionMode::Auto,
            actions: vec![RuleAction {
                action_type: ActionType::LogOnly,
                target: None,
                params: serde_json::json!({}),
            }],
            risk_level: risk,
            priority: 0,
            dedupe_window_seconds: 0,
            cooldown_seconds: 0,
            attention_budget_per_day: 0,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn emit_persists_event_and_runs_matching_rule() {
        let engine = engine_with_rule(notify_rule("order.placed", RiskLevel::Low)).await;
        let outcomes = engine.emit(Event::new("order.placed", "shop")).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, relayhive_schema::RuleRunStatus::Completed);

        let stored = engine.list_events(10, None, None).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn high_risk_auto_rule_creates_pending_approval() {
        let engine = engine_with_rule(notify_rule("fund.transfer", RiskLevel::High)).await;
        let outcomes = engine.emit(Event::new("fund.transfer", "finance")).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].approval_id.is_some());

        let pending = engine.list_pending_approvals().await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn resolving_approval_emits_follow_up_that_reenters_engine() {
        let engine = engine_with_rule(notify_rule("fund.transfer", RiskLevel::High)).await;
        engine.emit(Event::new("fund.transfer", "finance")).await;
        let pending = engine.list_pending_approvals().await.unwrap();
        let approval_id = pending[0].approval_id.clone();

        let resolution = engine.resolve_approval(&approval_id, true).await.unwrap();
        assert!(resolution.resolved);

        let events = engine.list_events(10, Some("approval.granted".to_string()), None).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn replay_event_reprocesses_without_duplicating_the_event_row() {
        let engine = engine_with_rule(notify_rule("order.placed", RiskLevel::Low)).await;
        let first = engine.emit(Event::new("order.placed", "shop")).await;
        let event_id = first[0].event_id.clone();

        let replayed = engine.replay_event(&event_id, false).await.unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].reason, "rule_event_already_processed");

        let stored = engine.list_events(10, None, None).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn reload_rules_without_rules_path_returns_current_count() {
        let engine = engine_with_rule(notify_rule("order.placed", RiskLevel::Low)).await;
        let count = engine.reload_rules().await;
        assert_eq!(count, 1);
    }
}
