//! Rule matching, governance decisioning, and action dispatch for a
//! single incoming event (§4.4-§4.5).

use std::sync::Arc;

use chrono::Utc;
use relayhive_rules::{evaluate, AttentionBudget};
use relayhive_schema::{
    ActionMode, EngineResult, Event, EventRule, RiskLevel, RuleDecision, RuleExecutionResult, RuleRun, RuleRunStatus,
};
use relayhive_store::EventStore;
use tokio::sync::RwLock;

use crate::approval_manager::ApprovalManager;
use crate::router::EventRouter;

pub struct RulesEngine {
    store: Arc<EventStore>,
    router: Arc<EventRouter>,
    approval_manager: Option<Arc<ApprovalManager>>,
    attention_budget: AttentionBudget,
    rules: RwLock<Vec<EventRule>>,
}

impl RulesEngine {
    pub fn new(store: Arc<EventStore>, router: Arc<EventRouter>, approval_manager: Option<Arc<ApprovalManager>>) -> Self {
        Self {
            store,
            router,
            approval_manager,
            attention_budget: AttentionBudget::new(),
            rules: RwLock::new(Vec::new()),
        }
    }

    pub async fn set_rules(&self, rules: Vec<EventRule>) {
        *self.rules.write().await = rules;
    }

    pub async fn add_rule(&self, rule: EventRule) {
        self.rules.write().await.push(rule);
    }

    /// Active rules sorted by priority descending.
    pub async fn list_rules(&self) -> Vec<EventRule> {
        let mut rules: Vec<EventRule> = self.rules.read().await.iter().filter(|r| r.is_active).cloned().collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }

    async fn match_rules(&self, event: &Event) -> Vec<EventRule> {
        self.list_rules()
            .await
            .into_iter()
            .filter(|rule| rule.matches_event_type(&event.event_type))
            .collect()
    }

    /// Computes the final decision (skip/ask/suggest/auto) for one
    /// (rule, event) pair, applying the governance gates in order:
    /// condition match, already-processed, dedupe window, cooldown,
    /// attention budget, high-risk escalation, and the approval-loop
    /// guard on `approval.*` events.
    pub async fn decide(&self, rule: &EventRule, event: &Event) -> EngineResult<RuleDecision> {
        self.decide_with_options(rule, event, false).await
    }

    async fn decide_with_options(&self, rule: &EventRule, event: &Event, bypass_dedup: bool) -> EngineResult<RuleDecision> {
        if !evaluate(&rule.conditions, event) {
            return Ok(RuleDecision {
                decision: ActionMode::Skip,
                reason: "condition_not_met".to_string(),
                rule_id: rule.id.clone(),
            });
        }

        if !bypass_dedup && self.store.has_rule_event_run(&rule.id, &event.event_id).await? {
            return Ok(RuleDecision {
                decision: ActionMode::Skip,
                reason: "rule_event_already_processed".to_string(),
                rule_id: rule.id.clone(),
            });
        }

        if rule.dedupe_window_seconds > 0 {
            if let Some(subject) = &event.subject {
                if self
                    .store
                    .has_recent_rule_subject_run(&rule.id, subject, rule.dedupe_window_seconds)
                    .await?
                {
                    return Ok(RuleDecision {
                        decision: ActionMode::Skip,
                        reason: "dedupe_window_hit".to_string(),
                        rule_id: rule.id.clone(),
                    });
                }
            }
        }

        if rule.cooldown_seconds > 0 {
            if let Some(last_run_at) = self.store.get_last_rule_run_at(&rule.id).await? {
                let elapsed = (Utc::now() - last_run_at).num_seconds();
                if elapsed < rule.cooldown_seconds {
                    return Ok(RuleDecision {
                        decision: ActionMode::Skip,
                        reason: format!("cooldown_active:{}s", rule.cooldown_seconds - elapsed),
                        rule_id: rule.id.clone(),
                    });
                }
            }
        }

        let scope = format!("{}:{}", rule.id, event.subject.as_deref().unwrap_or("_"));
        if rule.attention_budget_per_day > 0 && !self.attention_budget.allow(&scope, rule.attention_budget_per_day) {
            return Ok(RuleDecision {
                decision: ActionMode::Skip,
                reason: "attention_budget_exceeded".to_string(),
                rule_id: rule.id.clone(),
            });
        }

        let mut decision = rule.action_mode;
        let mut reason = "rule_match".to_string();

        if rule.risk_level == RiskLevel::High && decision == ActionMode::Auto {
            decision = ActionMode::Ask;
            reason = "high_risk_requires_approval".to_string();
        }
        // An approval.* event escalating back to `ask` would require a
        // second human approval to resolve the first, looping forever.
        if event.event_type.starts_with("approval.") && decision == ActionMode::Ask {
            decision = ActionMode::Suggest;
            reason = "approval_event_cannot_require_approval_again".to_string();
        }

        Ok(RuleDecision {
            decision,
            reason,
            rule_id: rule.id.clone(),
        })
    }

    /// Processes one event end-to-end: persists it (unless the caller
    /// already did, or its idempotency key was already seen), matches
    /// active rules, decides and routes each one, and records a
    /// `rule_runs` row per match.
    pub async fn handle_event(&self, event: Event, persist_event: bool) -> EngineResult<Vec<RuleExecutionResult>> {
        self.handle_event_with_options(event, persist_event, false).await
    }

    /// Same as `handle_event`, but with an explicit `bypass_dedup` flag
    /// used by `ReplayManager` to force rules to re-decide against an
    /// event they have already run against, rather than short-circuiting
    /// to `rule_event_already_processed` (§9).
    pub async fn handle_event_with_options(
        &self,
        event: Event,
        persist_event: bool,
        bypass_dedup: bool,
    ) -> EngineResult<Vec<RuleExecutionResult>> {
        if persist_event {
            if let Some(key) = &event.idempotency_key {
                if self.store.exists_idempotency(key).await? {
                    return Ok(Vec::new());
                }
            }
            match self.store.append(event.clone()).await {
                Ok(()) => {}
                Err(relayhive_schema::EngineError::DuplicateEvent) => return Ok(Vec::new()),
                Err(err) => return Err(err),
            }
        }

        let mut outcomes = Vec::new();
        for rule in self.match_rules(&event).await {
            let started = std::time::Instant::now();
            let decision = self.decide_with_options(&rule, &event, bypass_dedup).await?;
            let run = RuleRun::new_running(rule.id.clone(), event.event_id.clone(), &decision);
            let run_id = run.run_id.clone();
            self.store.insert_rule_run(run).await?;

            if decision.decision == ActionMode::Skip {
                self.store
                    .update_rule_run(&run_id, RuleRunStatus::Skipped, Some(decision.reason.clone()), Some(0), None)
                    .await?;
                outcomes.push(RuleExecutionResult {
                    run_id,
                    rule_id: rule.id.clone(),
                    event_id: event.event_id.clone(),
                    decision: decision.decision,
                    status: RuleRunStatus::Skipped,
                    reason: decision.reason,
                    approval_id: None,
                    errors: Vec::new(),
                });
                continue;
            }

            let mut approval_id = None;
            if decision.decision == ActionMode::Ask {
                if let Some(manager) = &self.approval_manager {
                    let approval = manager.request(&rule.id, &event.event_id, rule.risk_level).await?;
                    approval_id = Some(approval.approval_id);
                }
            }

            let route_report = self.router.route(&decision, &event, &rule).await;
            let duration_ms = started.elapsed().as_millis() as i64;

            let status = if decision.decision == ActionMode::Ask && approval_id.is_some() {
                RuleRunStatus::AwaitingApproval
            } else if route_report.failed > 0 && route_report.executed > 0 {
                RuleRunStatus::Partial
            } else if route_report.failed > 0 {
                RuleRunStatus::Failed
            } else {
                RuleRunStatus::Completed
            };

            let reason = if !route_report.errors.is_empty() {
                format!("{};errors={}", decision.reason, route_report.errors.len())
            } else {
                decision.reason
            };

            self.store
                .update_rule_run(&run_id, status, Some(reason.clone()), Some(duration_ms), Some(route_report.trace_id))
                .await?;

            outcomes.push(RuleExecutionResult {
                run_id,
                rule_id: rule.id.clone(),
                event_id: event.event_id.clone(),
                decision: decision.decision,
                status,
                reason,
                approval_id,
                errors: route_report.errors,
            });
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayhive_schema::ActionType;

    fn high_risk_rule() -> EventRule {
        EventRule {
            id: "r_high".into(),
            name: "r_high".into(),
            event_type: "fund.transfer".into(),
            conditions: serde_json::json!({"all": []}),
            action_mode: ActionMode::Auto,
            actions: vec![relayhive_schema::RuleAction {
                action_type: ActionType::LogOnly,
                target: None,
                params: serde_json::json!({}),
            }],
            risk_level: RiskLevel::High,
            priority: 10,
            dedupe_window_seconds: 0,
            cooldown_seconds: 0,
            attention_budget_per_day: 0,
            is_active: true,
        }
    }

    fn engine() -> RulesEngine {
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        let router = Arc::new(EventRouter::noop());
        RulesEngine::new(store, router, None)
    }

    #[tokio::test]
    async fn high_risk_auto_escalates_to_ask() {
        let engine = engine();
        let rule = high_risk_rule();
        let event = Event::new("fund.transfer", "finance");
        let decision = engine.decide(&rule, &event).await.unwrap();
        assert_eq!(decision.decision, ActionMode::Ask);
        assert_eq!(decision.reason, "high_risk_requires_approval");
    }

    #[tokio::test]
    async fn approval_event_cannot_require_approval_again() {
        let engine = engine();
        let rule = high_risk_rule();
        let event = Event::new("approval.requested", "approval_manager");
        let decision = engine.decide(&rule, &event).await.unwrap();
        assert_eq!(decision.decision, ActionMode::Suggest);
        assert_eq!(decision.reason, "approval_event_cannot_require_approval_again");
    }

    #[tokio::test]
    async fn handle_event_skips_on_condition_not_met() {
        let engine = engine();
        let mut rule = high_risk_rule();
        rule.risk_level = RiskLevel::Low;
        rule.conditions = serde_json::json!({"field": "payload.amount", "op": "gt", "value": 1000});
        engine.set_rules(vec![rule]).await;

        let event = Event::new("fund.transfer", "finance").with_payload(serde_json::json!({"amount": 10}));
        let outcomes = engine.handle_event(event, true).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, RuleRunStatus::Skipped);
        assert_eq!(outcomes[0].reason, "condition_not_met");
    }

    #[tokio::test]
    async fn handle_event_completes_auto_rule() {
        let engine = engine();
        let mut rule = high_risk_rule();
        rule.risk_level = RiskLevel::Low;
        engine.set_rules(vec![rule]).await;

        let event = Event::new("fund.transfer", "finance");
        let outcomes = engine.handle_event(event, true).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, RuleRunStatus::Completed);
        assert_eq!(outcomes[0].decision, ActionMode::Auto);
    }

    #[tokio::test]
    async fn handle_event_dedupes_by_idempotency_key() {
        let engine = engine();
        let rule = high_risk_rule();
        engine.set_rules(vec![rule]).await;

        let event = Event::new("fund.transfer", "finance").with_idempotency_key("key-1");
        let first = engine.handle_event(event.clone(), true).await.unwrap();
        assert_eq!(first.len(), 1);

        let mut second_event = event;
        second_event.event_id = "evt_other".into();
        let second = engine.handle_event(second_event, true).await.unwrap();
        assert!(second.is_empty());
    }
}
