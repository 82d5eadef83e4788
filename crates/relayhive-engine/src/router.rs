//! Dispatches a rule's decided action list to the executor selected by
//! `action.action_type` (§4.5, §9: a closed sum type rather than a
//! runtime plugin registry).

use std::time::Duration;

use async_trait::async_trait;
use relayhive_schema::{ActionType, Event, EventRule, RouteReport, RuleAction, RuleDecision};
use uuid::Uuid;

/// One action executor. Errors never propagate as panics — a failed
/// action is reported back to the router and the remaining actions on
/// the rule still run (§7: `ActionFailure` never halts sibling actions).
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        event: &Event,
        rule: &EventRule,
        action: &RuleAction,
        trace_id: &str,
    ) -> anyhow::Result<()>;
}

/// Forwards `notify` actions to a caller-supplied sink — out-of-core per
/// §4.5 ("forwards to the caller-supplied notification sink").
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        event: &Event,
        rule: &EventRule,
        action: &RuleAction,
        trace_id: &str,
    ) -> anyhow::Result<()>;
}

/// Drops every notification on the floor; used for wiring and tests.
pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn notify(
        &self,
        _event: &Event,
        _rule: &EventRule,
        _action: &RuleAction,
        _trace_id: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hands `run_agent`/`execute_plan` actions to the external task runner
/// (`TaskRunner`, out of scope — see spec §6). The engine only needs a
/// fire-and-forget dispatch surface; the gateway crate owns the actual
/// isolated session lifecycle for chat-triggered runs.
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        event: &Event,
        rule: &EventRule,
        action: &RuleAction,
        trace_id: &str,
    ) -> anyhow::Result<()>;
}

pub struct NoopAgentDispatcher;

#[async_trait]
impl AgentDispatcher for NoopAgentDispatcher {
    async fn dispatch(
        &self,
        _event: &Event,
        _rule: &EventRule,
        _action: &RuleAction,
        _trace_id: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Default webhook timeout (§5: "Webhook actions must use a bounded HTTP
/// timeout ... so a dead endpoint cannot stall a rule run").
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct EventRouter {
    notifier: Box<dyn NotificationSink>,
    dispatcher: Box<dyn AgentDispatcher>,
    http: reqwest::Client,
}

impl EventRouter {
    pub fn new(notifier: Box<dyn NotificationSink>, dispatcher: Box<dyn AgentDispatcher>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            notifier,
            dispatcher,
            http,
        }
    }

    pub fn noop() -> Self {
        Self::new(Box::new(NoopNotificationSink), Box::new(NoopAgentDispatcher))
    }

    /// Routes one rule's action list for one decided event. When
    /// `decision == ask`, only `notify` actions are dispatched
    /// (informational pings); every other action type is deferred until
    /// the approval is resolved and `approval.granted` re-enters the
    /// engine (§4.5).
    pub async fn route(&self, decision: &RuleDecision, event: &Event, rule: &EventRule) -> RouteReport {
        let trace_id = format!("trace_{}", Uuid::new_v4().simple());
        let mut report = RouteReport {
            trace_id: trace_id.clone(),
            executed: 0,
            failed: 0,
            errors: Vec::new(),
        };

        for action in &rule.actions {
            if decision.decision == relayhive_schema::ActionMode::Ask
                && action.action_type != ActionType::Notify
            {
                continue;
            }

            let result = self.execute_one(event, rule, action, &trace_id).await;
            match result {
                Ok(()) => report.executed += 1,
                Err(err) => {
                    report.failed += 1;
                    report.errors.push(format!("{}: {err}", action_label(action)));
                    tracing::warn!(
                        rule_id = %rule.id,
                        event_id = %event.event_id,
                        action_type = ?action.action_type,
                        error = %err,
                        "action executor failed"
                    );
                }
            }
        }

        report
    }

    async fn execute_one(
        &self,
        event: &Event,
        rule: &EventRule,
        action: &RuleAction,
        trace_id: &str,
    ) -> anyhow::Result<()> {
        match action.action_type {
            ActionType::Notify => self.notifier.notify(event, rule, action, trace_id).await,
            ActionType::LogOnly => {
                tracing::info!(
                    rule_id = %rule.id,
                    event_id = %event.event_id,
                    trace_id = %trace_id,
                    params = %action.params,
                    "log_only action"
                );
                Ok(())
            }
            ActionType::CallWebhook => self.call_webhook(event, rule, action, trace_id).await,
            ActionType::RunAgent | ActionType::ExecutePlan => {
                self.dispatcher.dispatch(event, rule, action, trace_id).await
            }
        }
    }

    async fn call_webhook(
        &self,
        event: &Event,
        rule: &EventRule,
        action: &RuleAction,
        trace_id: &str,
    ) -> anyhow::Result<()> {
        let target = action
            .target
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("call_webhook action missing target url"))?;

        let body = serde_json::json!({
            "event": event,
            "rule_id": rule.id,
            "trace_id": trace_id,
            "params": action.params,
        });

        let response = self.http.post(target).json(&body).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("webhook {target} returned {}", response.status());
        }
        Ok(())
    }
}

fn action_label(action: &RuleAction) -> String {
    match &action.target {
        Some(target) => format!("{:?}:{target}", action.action_type),
        None => format!("{:?}", action.action_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayhive_schema::{ActionMode, RiskLevel};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_rule(action: RuleAction) -> EventRule {
        EventRule {
            id: "r1".into(),
            name: "r1".into(),
            event_type: "fund.transfer".into(),
            conditions: serde_json::json!({"all": []}),
            action_mode: ActionMode::Auto,
            actions: vec![action],
            risk_level: RiskLevel::Low,
            priority: 0,
            dedupe_window_seconds: 0,
            cooldown_seconds: 0,
            attention_budget_per_day: 0,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn log_only_always_succeeds() {
        let router = EventRouter::noop();
        let event = Event::new("fund.transfer", "finance");
        let rule = sample_rule(RuleAction {
            action_type: ActionType::LogOnly,
            target: None,
            params: serde_json::json!({}),
        });
        let decision = RuleDecision {
            decision: ActionMode::Auto,
            reason: "rule_match".into(),
            rule_id: rule.id.clone(),
        };
        let report = router.route(&decision, &event, &rule).await;
        assert_eq!(report.executed, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn ask_decision_defers_non_notify_actions() {
        let router = EventRouter::noop();
        let event = Event::new("fund.transfer", "finance");
        let rule = sample_rule(RuleAction {
            action_type: ActionType::CallWebhook,
            target: Some("http://127.0.0.1:1/unreachable".into()),
            params: serde_json::json!({}),
        });
        let decision = RuleDecision {
            decision: ActionMode::Ask,
            reason: "high_risk_requires_approval".into(),
            rule_id: rule.id.clone(),
        };
        let report = router.route(&decision, &event, &rule).await;
        assert_eq!(report.executed, 0);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn webhook_non_2xx_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let router = EventRouter::noop();
        let event = Event::new("fund.transfer", "finance");
        let rule = sample_rule(RuleAction {
            action_type: ActionType::CallWebhook,
            target: Some(format!("{}/hook", server.uri())),
            params: serde_json::json!({}),
        });
        let decision = RuleDecision {
            decision: ActionMode::Auto,
            reason: "rule_match".into(),
            rule_id: rule.id.clone(),
        };
        let report = router.route(&decision, &event, &rule).await;
        assert_eq!(report.executed, 0);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn webhook_2xx_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let router = EventRouter::noop();
        let event = Event::new("fund.transfer", "finance");
        let rule = sample_rule(RuleAction {
            action_type: ActionType::CallWebhook,
            target: Some(format!("{}/hook", server.uri())),
            params: serde_json::json!({}),
        });
        let decision = RuleDecision {
            decision: ActionMode::Auto,
            reason: "rule_match".into(),
            rule_id: rule.id.clone(),
        };
        let report = router.route(&decision, &event, &rule).await;
        assert_eq!(report.executed, 1);
        assert_eq!(report.failed, 0);
    }
}
