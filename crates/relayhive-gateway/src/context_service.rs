//! Per-conversation ingest pipeline (§4.11), grounded on
//! `original_source/runtime/src/gateway/context_service.py`.
//!
//! Each inbound chat message is appended to its conversation's context
//! log unconditionally; whether it also triggers a background task
//! execution is decided by `addressing::decide_addressing`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use relayhive_schema::{
    AddressingPolicy, EngineResult, GatewayContextMessage, GatewayConversation, GatewayTaskRun, MessageRole,
    TaskRunOutcome, TaskRunRequest, TaskRunStatus,
};
use relayhive_runtime::TaskRunner;
use relayhive_store::GatewayStore;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::addressing::{continuation_hit, decide_addressing};

/// Result handed back to the HTTP layer once ingest completes; the task
/// execution itself (if any) continues in the background.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub conversation_id: String,
    pub addressed: bool,
    pub should_execute: bool,
    pub address_reason: String,
    pub task_run_id: Option<String>,
    pub runtime_session_id: Option<String>,
}

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Callback invoked once a spawned task execution settles, so the
/// gateway manager can push the result back out through a provider
/// sender without the ingest call itself blocking on it.
pub type OnResult = Arc<dyn Fn(GatewayTaskRun) -> BoxFuture + Send + Sync>;

pub struct GatewayContextService {
    store: GatewayStore,
    task_runner: Arc<dyn TaskRunner>,
    db_path: String,
    rules_path: String,
    conversation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl GatewayContextService {
    pub fn new(store: GatewayStore, task_runner: Arc<dyn TaskRunner>, db_path: String, rules_path: String) -> Self {
        Self {
            store,
            task_runner,
            db_path,
            rules_path,
            conversation_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut guard = self.conversation_locks.lock().await;
        guard
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Full flow from §4.11: resolve conversation, decide addressing,
    /// append the user message, and — if addressed for execution — spawn
    /// an isolated task-runner invocation in the background.
    #[allow(clippy::too_many_arguments)]
    pub async fn ingest_message(
        &self,
        provider: &str,
        bot_id: &str,
        chat_id: &str,
        text: &str,
        is_mention: bool,
        is_reply_to_bot: bool,
        metadata: serde_json::Value,
        policy: &AddressingPolicy,
        agent_id: &str,
        force_execute: bool,
        on_result: Option<OnResult>,
    ) -> EngineResult<IngestOutcome> {
        let gateway_key = format!("{provider}:{bot_id}:{chat_id}");
        let conversation = self.store.get_or_create_conversation(provider, &gateway_key, bot_id, chat_id).await?;

        let conversation_lock = self.lock_for(&conversation.id).await;
        let _guard = conversation_lock.lock().await;

        let latest_assistant_at = self.store.latest_assistant_at(&conversation.id).await?;
        let continuation = continuation_hit(latest_assistant_at, Utc::now(), policy.session_continuation_window_sec);
        let decision = decide_addressing(text, is_mention, is_reply_to_bot, policy, continuation, force_execute);

        let mut message_metadata = metadata;
        merge_addressing_metadata(&mut message_metadata, &decision);

        let user_message = self
            .store
            .append_context_message(&conversation.id, MessageRole::User, text, message_metadata)
            .await?;

        if !decision.should_execute {
            return Ok(IngestOutcome {
                conversation_id: conversation.id,
                addressed: decision.addressed,
                should_execute: false,
                address_reason: decision.reason,
                task_run_id: None,
                runtime_session_id: None,
            });
        }

        let runtime_session_id = format!("sess_{provider}_{}", short_hex());
        let task_run = self
            .store
            .create_task_run(&conversation.id, &runtime_session_id, &user_message.id, user_message.context_version)
            .await?;

        self.spawn_execution(conversation.clone(), task_run.clone(), runtime_session_id.clone(), text.to_string(), agent_id.to_string(), on_result);

        Ok(IngestOutcome {
            conversation_id: conversation.id,
            addressed: decision.addressed,
            should_execute: true,
            address_reason: decision.reason,
            task_run_id: Some(task_run.id),
            runtime_session_id: Some(runtime_session_id),
        })
    }

    fn spawn_execution(
        &self,
        conversation: GatewayConversation,
        task_run: GatewayTaskRun,
        runtime_session_id: String,
        task: String,
        agent_id: String,
        on_result: Option<OnResult>,
    ) {
        let store = self.store.clone();
        let task_runner = self.task_runner.clone();
        let db_path = self.db_path.clone();
        let rules_path = self.rules_path.clone();

        tokio::spawn(async move {
            if let Err(error) = store
                .update_task_run(&task_run.id, TaskRunStatus::Running, None, None)
                .await
            {
                tracing::warn!(run_id = %task_run.id, %error, "failed to mark gateway task run running");
            }

            let request = TaskRunRequest {
                task,
                db_path,
                rules_path,
                agent_id,
                session_id: runtime_session_id,
                model: None,
                system_prompt: None,
            };

            let outcome = task_runner.run(request).await;

            let finished = match outcome {
                Ok(TaskRunOutcome { error: Some(error), .. }) => finish_failed(&store, &conversation, &task_run, &error).await,
                Ok(outcome) => finish_done(&store, &conversation, &task_run, outcome).await,
                Err(error) => finish_failed(&store, &conversation, &task_run, &error.to_string()).await,
            };

            if let (Some(on_result), Ok(run)) = (on_result, finished) {
                on_result(run).await;
            }
        });
    }

    pub async fn list_conversations(&self, provider: Option<String>, limit: i64) -> EngineResult<Vec<GatewayConversation>> {
        self.store.list_conversations(provider, limit).await
    }

    pub async fn list_task_runs(&self, conversation_id: &str, limit: i64) -> EngineResult<Vec<GatewayTaskRun>> {
        self.store.list_task_runs(conversation_id, limit).await
    }

    pub async fn list_context(&self, conversation_id: &str, limit: i64) -> EngineResult<Vec<GatewayContextMessage>> {
        self.store.list_context_messages(conversation_id, limit).await
    }
}

async fn finish_done(
    store: &GatewayStore,
    conversation: &GatewayConversation,
    task_run: &GatewayTaskRun,
    outcome: TaskRunOutcome,
) -> EngineResult<GatewayTaskRun> {
    let summary = if outcome.final_response.trim().is_empty() {
        "(no response)".to_string()
    } else {
        outcome.final_response.clone()
    };
    let metadata = serde_json::json!({"runtime_events": outcome.runtime_events, "tool_results": outcome.tool_results});
    store
        .update_task_run(&task_run.id, TaskRunStatus::Done, Some(summary.clone()), Some(metadata))
        .await?;
    store
        .append_context_message(
            &conversation.id,
            MessageRole::Assistant,
            &summary,
            serde_json::json!({"minimal_writeback": true, "task_run_id": task_run.id}),
        )
        .await?;
    Ok(GatewayTaskRun {
        status: TaskRunStatus::Done,
        result_summary: Some(summary),
        ..task_run.clone()
    })
}

async fn finish_failed(
    store: &GatewayStore,
    conversation: &GatewayConversation,
    task_run: &GatewayTaskRun,
    error: &str,
) -> EngineResult<GatewayTaskRun> {
    store
        .update_task_run(&task_run.id, TaskRunStatus::Failed, Some(error.to_string()), None)
        .await?;
    let failure_notice = format!("task execution failed: {error}");
    store
        .append_context_message(
            &conversation.id,
            MessageRole::Assistant,
            &failure_notice,
            serde_json::json!({"minimal_writeback": true, "task_run_id": task_run.id, "error": true}),
        )
        .await?;
    Ok(GatewayTaskRun {
        status: TaskRunStatus::Failed,
        result_summary: Some(failure_notice),
        ..task_run.clone()
    })
}

fn merge_addressing_metadata(metadata: &mut serde_json::Value, decision: &relayhive_schema::AddressingDecision) {
    if !metadata.is_object() {
        *metadata = serde_json::json!({});
    }
    if let Some(object) = metadata.as_object_mut() {
        object.insert("addressed".to_string(), serde_json::json!(decision.addressed));
        object.insert("should_execute".to_string(), serde_json::json!(decision.should_execute));
        object.insert("address_reason".to_string(), serde_json::json!(decision.reason));
    }
}

fn short_hex() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relayhive_store::EventStore;

    struct EchoRunner;

    #[async_trait]
    impl TaskRunner for EchoRunner {
        async fn run(&self, request: TaskRunRequest) -> anyhow::Result<TaskRunOutcome> {
            Ok(TaskRunOutcome {
                final_response: format!("echo: {}", request.task),
                error: None,
                runtime_events: Vec::new(),
                tool_results: Vec::new(),
            })
        }
    }

    struct FailingRunner;

    #[async_trait]
    impl TaskRunner for FailingRunner {
        async fn run(&self, _request: TaskRunRequest) -> anyhow::Result<TaskRunOutcome> {
            anyhow::bail!("boom")
        }
    }

    fn store() -> GatewayStore {
        let event_store = EventStore::open_in_memory().unwrap();
        GatewayStore::from_connection(event_store.connection())
    }

    fn all_messages_policy() -> AddressingPolicy {
        AddressingPolicy::default_for_provider("telegram")
    }

    #[tokio::test]
    async fn unaddressed_message_is_logged_without_execution() {
        let service = GatewayContextService::new(store(), Arc::new(EchoRunner), "db".into(), "rules".into());
        let mut mention_only = AddressingPolicy::default_for_provider("feishu");
        mention_only.execute_on_unaddressed = false;

        let outcome = service
            .ingest_message("feishu", "bot1", "chat1", "hey there", false, false, serde_json::json!({}), &mention_only, "agent1", false, None)
            .await
            .unwrap();

        assert!(!outcome.should_execute);
        assert!(outcome.task_run_id.is_none());

        let context = service.list_context(&outcome.conversation_id, 10).await.unwrap();
        assert_eq!(context.len(), 1);
    }

    #[tokio::test]
    async fn addressed_message_spawns_task_and_appends_assistant_reply() {
        let service = Arc::new(GatewayContextService::new(store(), Arc::new(EchoRunner), "db".into(), "rules".into()));
        let policy = all_messages_policy();

        let outcome = service
            .ingest_message("telegram", "bot1", "chat1", "hello", false, false, serde_json::json!({}), &policy, "agent1", false, None)
            .await
            .unwrap();

        assert!(outcome.should_execute);
        let run_id = outcome.task_run_id.clone().unwrap();

        for _ in 0..50 {
            let runs = service.list_task_runs(&outcome.conversation_id, 10).await.unwrap();
            if runs.iter().any(|r| r.id == run_id && r.status == TaskRunStatus::Done) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let runs = service.list_task_runs(&outcome.conversation_id, 10).await.unwrap();
        let run = runs.iter().find(|r| r.id == run_id).unwrap();
        assert_eq!(run.status, TaskRunStatus::Done);

        let context = service.list_context(&outcome.conversation_id, 10).await.unwrap();
        assert!(context.iter().any(|m| m.role == MessageRole::Assistant));
    }

    #[tokio::test]
    async fn failing_task_runner_marks_run_failed() {
        let service = Arc::new(GatewayContextService::new(store(), Arc::new(FailingRunner), "db".into(), "rules".into()));
        let policy = all_messages_policy();

        let outcome = service
            .ingest_message("telegram", "bot1", "chat1", "hello", false, false, serde_json::json!({}), &policy, "agent1", false, None)
            .await
            .unwrap();
        let run_id = outcome.task_run_id.clone().unwrap();

        for _ in 0..50 {
            let runs = service.list_task_runs(&outcome.conversation_id, 10).await.unwrap();
            if runs.iter().any(|r| r.id == run_id && r.status == TaskRunStatus::Failed) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let runs = service.list_task_runs(&outcome.conversation_id, 10).await.unwrap();
        let run = runs.iter().find(|r| r.id == run_id).unwrap();
        assert_eq!(run.status, TaskRunStatus::Failed);
    }
}
