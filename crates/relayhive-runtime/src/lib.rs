//! The out-of-core external task runner interface (§6). The real agent
//! session lifecycle lives outside this crate; `relayhive-gateway` only
//! needs a trait object it can call into and cancel.

use anyhow::Result;
use async_trait::async_trait;
use relayhive_schema::{TaskRunOutcome, TaskRunRequest};

/// Executes one isolated task-runner session. Implementations must be
/// idempotent for a given `(session_id, task)` pair — the core never
/// retries a call automatically on timeout or error.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, request: TaskRunRequest) -> Result<TaskRunOutcome>;
}

/// Ships for wiring and tests: echoes back a stock "not implemented"
/// outcome rather than performing any real agent session.
pub struct NoopTaskRunner;

#[async_trait]
impl TaskRunner for NoopTaskRunner {
    async fn run(&self, request: TaskRunRequest) -> Result<TaskRunOutcome> {
        Ok(TaskRunOutcome {
            final_response: format!("task runner not configured: {}", request.task),
            error: None,
            runtime_events: Vec::new(),
            tool_results: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> TaskRunRequest {
        TaskRunRequest {
            task: "summarize the thread".to_string(),
            db_path: "/tmp/relayhive.sqlite3".to_string(),
            rules_path: "/tmp/rules".to_string(),
            agent_id: "agent-1".to_string(),
            session_id: "session-1".to_string(),
            model: None,
            system_prompt: None,
        }
    }

    #[tokio::test]
    async fn noop_runner_echoes_stock_response() {
        let runner = NoopTaskRunner;
        let outcome = runner.run(sample_request()).await.unwrap();
        assert!(outcome.final_response.contains("summarize the thread"));
        assert!(outcome.error.is_none());
    }
}
