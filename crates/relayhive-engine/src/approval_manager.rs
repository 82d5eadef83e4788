//! Human-in-the-loop approval gates created whenever a rule's decision
//! resolves to `ask` (§4.6).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use relayhive_schema::{ApprovalRequest, ApprovalResolution, ApprovalStatus, Event, EngineResult, RiskLevel};
use relayhive_store::EventStore;

type EmitFn = Arc<dyn Fn(Event) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Creates, lists, and resolves approval gates. Resolving an approval
/// re-enters the engine by emitting `approval.granted` or
/// `approval.denied` through the caller-supplied `emit` callback, so the
/// same rule machinery that reacted to the original event can react to
/// its approval outcome (§4.6: "resolving an approval emits a follow-up
/// event rather than calling the rule's actions directly").
pub struct ApprovalManager {
    store: Arc<EventStore>,
    emit: Option<EmitFn>,
}

impl ApprovalManager {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self { store, emit: None }
    }

    /// Attaches the callback used to publish `approval.*` follow-up
    /// events. Kept separate from `new` because the engine composition
    /// root builds the emit closure from `self` after construction.
    pub fn with_emit<F, Fut>(mut self, emit: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.emit = Some(Arc::new(move |event| Box::pin(emit(event))));
        self
    }

    pub async fn request(&self, rule_id: &str, event_id: &str, risk_level: RiskLevel) -> EngineResult<ApprovalRequest> {
        let approval = ApprovalRequest {
            approval_id: format!("apr_{}", uuid::Uuid::new_v4().simple()),
            rule_id: rule_id.to_string(),
            event_id: event_id.to_string(),
            risk_level,
            context: serde_json::json!({}),
            status: ApprovalStatus::Pending,
            created_at: chrono::Utc::now(),
            resolved_at: None,
        };
        self.store.insert_approval(approval.clone()).await?;

        if let Some(emit) = &self.emit {
            let follow_up = Event::new("approval.requested", "approval_manager")
                .with_subject(approval.approval_id.clone())
                .with_payload(serde_json::json!({
                    "approval_id": approval.approval_id,
                    "rule_id": approval.rule_id,
                    "event_id": approval.event_id,
                    "risk_level": approval.risk_level.to_string(),
                }));
            emit(follow_up).await;
        }

        Ok(approval)
    }

    pub async fn list_pending(&self) -> EngineResult<Vec<ApprovalRequest>> {
        self.store.list_pending_approvals().await
    }

    /// Resolves a pending approval. Idempotent on an already-terminal or
    /// unknown approval: returns `{resolved: false, status}` rather than
    /// erroring, so a stale or mistyped approval id never throws (§4.6,
    /// §7: "resolve of a non-existent or terminal approval ... never
    /// throws").
    pub async fn resolve(&self, approval_id: &str, approve: bool) -> EngineResult<ApprovalResolution> {
        let existing = self.store.get_approval(approval_id).await?;
        let Some(existing) = existing else {
            return Ok(ApprovalResolution {
                resolved: false,
                status: ApprovalStatus::Pending,
            });
        };
        if existing.status.is_terminal() {
            return Ok(ApprovalResolution {
                resolved: false,
                status: existing.status,
            });
        }

        let status = if approve { ApprovalStatus::Approved } else { ApprovalStatus::Rejected };
        let updated = self.store.update_approval(approval_id, status).await?;

        if let Some(emit) = &self.emit {
            let event_type = if approve { "approval.granted" } else { "approval.denied" };
            let follow_up = Event::new(event_type, "approval_manager")
                .with_subject(updated.approval_id.clone())
                .with_payload(serde_json::json!({
                    "approval_id": updated.approval_id,
                    "rule_id": updated.rule_id,
                    "event_id": updated.event_id,
                    "risk_level": updated.risk_level.to_string(),
                }));
            emit(follow_up).await;
        }

        Ok(ApprovalResolution {
            resolved: true,
            status: updated.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn request_persists_pending_and_emits_requested() {
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        let emitted = Arc::new(AtomicUsize::new(0));
        let emitted_clone = emitted.clone();
        let manager = ApprovalManager::new(store.clone()).with_emit(move |event| {
            let emitted = emitted_clone.clone();
            async move {
                assert_eq!(event.event_type, "approval.requested");
                emitted.fetch_add(1, Ordering::SeqCst);
            }
        });

        let approval = manager.request("rule_1", "evt_1", RiskLevel::High).await.unwrap();
        assert_eq!(approval.status, ApprovalStatus::Pending);
        assert_eq!(emitted.load(Ordering::SeqCst), 1);

        let pending = manager.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn resolve_approve_emits_granted_once() {
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        let granted = Arc::new(AtomicUsize::new(0));
        let granted_clone = granted.clone();
        let manager = ApprovalManager::new(store.clone()).with_emit(move |event| {
            let granted = granted_clone.clone();
            async move {
                if event.event_type == "approval.granted" {
                    granted.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        let approval = manager.request("rule_1", "evt_1", RiskLevel::High).await.unwrap();
        let resolution = manager.resolve(&approval.approval_id, true).await.unwrap();
        assert!(resolution.resolved);
        assert_eq!(resolution.status, ApprovalStatus::Approved);
        assert_eq!(granted.load(Ordering::SeqCst), 1);

        // Resolving again is a no-op: no second follow-up event, status unchanged.
        let second = manager.resolve(&approval.approval_id, false).await.unwrap();
        assert!(!second.resolved);
        assert_eq!(second.status, ApprovalStatus::Approved);
        assert_eq!(granted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolve_unknown_approval_returns_unresolved_instead_of_erroring() {
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        let manager = ApprovalManager::new(store);
        let resolution = manager.resolve("apr_missing", true).await.unwrap();
        assert!(!resolution.resolved);
        assert_eq!(resolution.status, ApprovalStatus::Pending);
    }
}
