//! Re-runs a previously stored event through the rules engine without
//! re-appending it (§4.7, §9).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use relayhive_schema::{EngineError, EngineResult, RuleExecutionResult};
use relayhive_store::EventStore;

use crate::rules_engine::RulesEngine;

pub struct ReplayManager {
    store: Arc<EventStore>,
    rules_engine: Arc<RulesEngine>,
}

impl ReplayManager {
    pub fn new(store: Arc<EventStore>, rules_engine: Arc<RulesEngine>) -> Self {
        Self { store, rules_engine }
    }

    /// Loads `event_id` and re-runs it through `handle_event(persist_event
    /// = false)`. `bypass_dedup = false` (the default reading) lets the
    /// existing `rule_event_already_processed` guard apply normally, so a
    /// replay of an already-handled event produces skipped runs rather
    /// than duplicate side effects; pass `true` to force every matching
    /// rule to re-decide from scratch.
    pub async fn replay_event(&self, event_id: &str, bypass_dedup: bool) -> EngineResult<Vec<RuleExecutionResult>> {
        let event = self
            .store
            .get(event_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("event {event_id}")))?;
        self.rules_engine
            .handle_event_with_options(event, false, bypass_dedup)
            .await
    }

    /// Replays every stored event of `event_type` since `since`, oldest
    /// first, returning the number of events replayed (not the number of
    /// rule runs). `list_events` returns most-recent-first, so results
    /// are collected and reversed before replay rather than paginated
    /// forward with a cursor (cursor pagination is for the dashboard's
    /// live-tail reads, not bulk replay).
    pub async fn replay_by_type(&self, event_type: &str, since: DateTime<Utc>) -> EngineResult<usize> {
        let recent = self
            .store
            .list_events(10_000, Some(event_type.to_string()), None)
            .await?;

        let mut replayed = 0usize;
        for event in recent.into_iter().rev().filter(|e| e.timestamp >= since) {
            self.rules_engine
                .handle_event_with_options(event, false, false)
                .await?;
            replayed += 1;
        }

        Ok(replayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::EventRouter;
    use relayhive_schema::{ActionMode, ActionType, Event, EventRule, RiskLevel, RuleAction, RuleRunStatus};

    fn rule() -> EventRule {
        EventRule {
            id: "r1".into(),
            name: "r1".into(),
            event_type: "payment.made".into(),
            conditions: serde_json::json!({"all": []}),
            action_mode: ActionMode::Auto,
            actions: vec![RuleAction {
                action_type: ActionType::LogOnly,
                target: None,
                params: serde_json::json!({}),
            }],
            risk_level: RiskLevel::Low,
            priority: 0,
            dedupe_window_seconds: 0,
            cooldown_seconds: 0,
            attention_budget_per_day: 0,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn replay_without_bypass_skips_already_processed() {
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        let router = Arc::new(EventRouter::noop());
        let engine = Arc::new(RulesEngine::new(store.clone(), router, None));
        engine.set_rules(vec![rule()]).await;

        let event = Event::new("payment.made", "ledger");
        let event_id = event.event_id.clone();
        let first = engine.handle_event(event, true).await.unwrap();
        assert_eq!(first[0].status, RuleRunStatus::Completed);

        let replay = ReplayManager::new(store, engine);
        let outcomes = replay.replay_event(&event_id, false).await.unwrap();
        assert_eq!(outcomes[0].status, RuleRunStatus::Skipped);
        assert_eq!(outcomes[0].reason, "rule_event_already_processed");
    }

    #[tokio::test]
    async fn replay_with_bypass_reruns_normally() {
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        let router = Arc::new(EventRouter::noop());
        let engine = Arc::new(RulesEngine::new(store.clone(), router, None));
        engine.set_rules(vec![rule()]).await;

        let event = Event::new("payment.made", "ledger");
        let event_id = event.event_id.clone();
        engine.handle_event(event, true).await.unwrap();

        let replay = ReplayManager::new(store, engine);
        let outcomes = replay.replay_event(&event_id, true).await.unwrap();
        assert_eq!(outcomes[0].status, RuleRunStatus::Completed);
    }

    #[tokio::test]
    async fn replay_unknown_event_is_not_found() {
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        let router = Arc::new(EventRouter::noop());
        let engine = Arc::new(RulesEngine::new(store.clone(), router, None));
        let replay = ReplayManager::new(store, engine);
        let err = replay.replay_event("evt_missing", false).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
