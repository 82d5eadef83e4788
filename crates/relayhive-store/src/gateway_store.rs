//! Durable per-conversation gateway state: conversations, the append-only
//! context log, and isolated task-run records (§3, §4.11).
//!
//! `context_version` is assigned under the same connection mutex that
//! serializes every other write, so concurrent appends to one
//! conversation cannot observe or assign the same version twice.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use relayhive_schema::{
    EngineError, EngineResult, GatewayContextMessage, GatewayConversation, GatewayTaskRun,
    MessageRole, TaskRunStatus,
};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

#[derive(Clone)]
pub struct GatewayStore {
    conn: Arc<Mutex<Connection>>,
}

fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<GatewayConversation> {
    Ok(GatewayConversation {
        id: row.get("id")?,
        provider: row.get("provider")?,
        gateway_key: row.get("gateway_key")?,
        bot_id: row.get("bot_id")?,
        chat_id: row.get("chat_id")?,
        main_context_id: row.get("main_context_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<GatewayContextMessage> {
    let metadata_text: String = row.get("metadata")?;
    Ok(GatewayContextMessage {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        role: MessageRole::parse(&row.get::<_, String>("role")?),
        content: row.get("content")?,
        metadata: serde_json::from_str(&metadata_text).unwrap_or(serde_json::Value::Null),
        context_version: row.get("context_version")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_task_run(row: &rusqlite::Row) -> rusqlite::Result<GatewayTaskRun> {
    let metadata_text: String = row.get("result_metadata")?;
    Ok(GatewayTaskRun {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        runtime_session_id: row.get("runtime_session_id")?,
        source_message_id: row.get("source_message_id")?,
        snapshot_version: row.get("snapshot_version")?,
        status: TaskRunStatus::parse(&row.get::<_, String>("status")?),
        result_summary: row.get("result_summary")?,
        result_metadata: serde_json::from_str(&metadata_text).unwrap_or(serde_json::Value::Null),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl GatewayStore {
    /// Shares the connection underlying an already-opened `EventStore`, so
    /// both stores live in the one on-disk database (§6: "a single
    /// relational database for events, rule-runs, approvals,
    /// conversations, messages, task-runs").
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub async fn get_or_create_conversation(
        &self,
        provider: &str,
        gateway_key: &str,
        bot_id: &str,
        chat_id: &str,
    ) -> EngineResult<GatewayConversation> {
        let conn = self.conn.clone();
        let (provider, gateway_key, bot_id, chat_id) = (
            provider.to_string(),
            gateway_key.to_string(),
            bot_id.to_string(),
            chat_id.to_string(),
        );
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("gateway store mutex poisoned");
            let existing = conn
                .query_row(
                    "SELECT * FROM gateway_conversations WHERE gateway_key = ?1",
                    params![gateway_key],
                    row_to_conversation,
                )
                .optional()
                .map_err(|e| EngineError::Internal(e.into()))?;
            if let Some(conversation) = existing {
                return Ok(conversation);
            }

            let now = Utc::now();
            let id = format!("conv_{}", Uuid::new_v4().simple());
            let main_context_id = format!("ctx_{}", Uuid::new_v4().simple());
            conn.execute(
                "INSERT INTO gateway_conversations
                    (id, provider, gateway_key, bot_id, chat_id, main_context_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![id, provider, gateway_key, bot_id, chat_id, main_context_id, now],
            )
            .map_err(|e| EngineError::Internal(e.into()))?;

            Ok(GatewayConversation {
                id,
                provider,
                gateway_key,
                bot_id,
                chat_id,
                main_context_id,
                created_at: now,
                updated_at: now,
            })
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn list_conversations(
        &self,
        provider: Option<String>,
        limit: i64,
    ) -> EngineResult<Vec<GatewayConversation>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("gateway store mutex poisoned");
            match &provider {
                Some(provider) => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT * FROM gateway_conversations WHERE provider = ?1
                             ORDER BY updated_at DESC LIMIT ?2",
                        )
                        .map_err(|e| EngineError::Internal(e.into()))?;
                    let rows = stmt
                        .query_map(params![provider, limit], row_to_conversation)
                        .map_err(|e| EngineError::Internal(e.into()))?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(|e| EngineError::Internal(e.into()))
                }
                None => {
                    let mut stmt = conn
                        .prepare("SELECT * FROM gateway_conversations ORDER BY updated_at DESC LIMIT ?1")
                        .map_err(|e| EngineError::Internal(e.into()))?;
                    let rows = stmt
                        .query_map(params![limit], row_to_conversation)
                        .map_err(|e| EngineError::Internal(e.into()))?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(|e| EngineError::Internal(e.into()))
                }
            }
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    /// Appends one message, assigning the next monotonic `context_version`
    /// for the conversation inside the same critical section.
    pub async fn append_context_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        metadata: serde_json::Value,
    ) -> EngineResult<GatewayContextMessage> {
        let conn = self.conn.clone();
        let (conversation_id, content) = (conversation_id.to_string(), content.to_string());
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().expect("gateway store mutex poisoned");
            let tx = conn.transaction().map_err(anyhow::Error::from)?;

            let next_version: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(context_version), 0) + 1 FROM gateway_context_messages
                     WHERE conversation_id = ?1",
                    params![conversation_id],
                    |row| row.get(0),
                )
                .map_err(anyhow::Error::from)?;

            let now = Utc::now();
            let id = format!("msg_{}", Uuid::new_v4().simple());
            let metadata_text = serde_json::to_string(&metadata).unwrap_or_default();
            tx.execute(
                "INSERT INTO gateway_context_messages
                    (id, conversation_id, role, content, metadata, context_version, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, conversation_id, role.to_string(), content, metadata_text, next_version, now],
            )
            .map_err(anyhow::Error::from)?;

            tx.execute(
                "UPDATE gateway_conversations SET updated_at = ?1 WHERE id = ?2",
                params![now, conversation_id],
            )
            .map_err(anyhow::Error::from)?;

            tx.commit().map_err(anyhow::Error::from)?;

            Ok(GatewayContextMessage {
                id,
                conversation_id,
                role,
                content,
                metadata,
                context_version: next_version,
                created_at: now,
            })
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn list_context_messages(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> EngineResult<Vec<GatewayContextMessage>> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("gateway store mutex poisoned");
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM gateway_context_messages WHERE conversation_id = ?1
                     ORDER BY context_version ASC LIMIT ?2",
                )
                .map_err(|e| EngineError::Internal(e.into()))?;
            let rows = stmt
                .query_map(params![conversation_id, limit], row_to_message)
                .map_err(|e| EngineError::Internal(e.into()))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| EngineError::Internal(e.into()))
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    /// Timestamp of the most recent assistant message in the conversation,
    /// used by the addressing policy's session-continuation check.
    pub async fn latest_assistant_at(
        &self,
        conversation_id: &str,
    ) -> EngineResult<Option<chrono::DateTime<Utc>>> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("gateway store mutex poisoned");
            conn.query_row(
                "SELECT MAX(created_at) FROM gateway_context_messages
                 WHERE conversation_id = ?1 AND role = 'assistant'",
                params![conversation_id],
                |row| row.get::<_, Option<chrono::DateTime<Utc>>>(0),
            )
            .map_err(|e| EngineError::Internal(e.into()))
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn create_task_run(
        &self,
        conversation_id: &str,
        runtime_session_id: &str,
        source_message_id: &str,
        snapshot_version: i64,
    ) -> EngineResult<GatewayTaskRun> {
        let conn = self.conn.clone();
        let (conversation_id, runtime_session_id, source_message_id) = (
            conversation_id.to_string(),
            runtime_session_id.to_string(),
            source_message_id.to_string(),
        );
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("gateway store mutex poisoned");
            let now = Utc::now();
            let id = format!("taskrun_{}", Uuid::new_v4().simple());
            conn.execute(
                "INSERT INTO gateway_task_runs
                    (id, conversation_id, runtime_session_id, source_message_id, snapshot_version,
                     status, result_summary, result_metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'queued', NULL, '{}', ?6, ?6)",
                params![id, conversation_id, runtime_session_id, source_message_id, snapshot_version, now],
            )
            .map_err(|e| EngineError::Internal(e.into()))?;

            Ok(GatewayTaskRun {
                id,
                conversation_id,
                runtime_session_id,
                source_message_id,
                snapshot_version,
                status: TaskRunStatus::Queued,
                result_summary: None,
                result_metadata: serde_json::json!({}),
                created_at: now,
                updated_at: now,
            })
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn update_task_run(
        &self,
        run_id: &str,
        status: TaskRunStatus,
        result_summary: Option<String>,
        result_metadata: Option<serde_json::Value>,
    ) -> EngineResult<()> {
        let conn = self.conn.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("gateway store mutex poisoned");
            let metadata_text = result_metadata.map(|m| serde_json::to_string(&m).unwrap_or_default());
            let updated = conn
                .execute(
                    "UPDATE gateway_task_runs SET
                        status = ?1,
                        result_summary = COALESCE(?2, result_summary),
                        result_metadata = COALESCE(?3, result_metadata),
                        updated_at = ?4
                     WHERE id = ?5",
                    params![status.to_string(), result_summary, metadata_text, Utc::now(), run_id],
                )
                .map_err(|e| EngineError::Internal(e.into()))?;
            if updated == 0 {
                return Err(EngineError::NotFound(format!("gateway_task_run {run_id}")));
            }
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn list_task_runs(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> EngineResult<Vec<GatewayTaskRun>> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("gateway store mutex poisoned");
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM gateway_task_runs WHERE conversation_id = ?1
                     ORDER BY created_at DESC LIMIT ?2",
                )
                .map_err(|e| EngineError::Internal(e.into()))?;
            let rows = stmt
                .query_map(params![conversation_id, limit], row_to_task_run)
                .map_err(|e| EngineError::Internal(e.into()))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| EngineError::Internal(e.into()))
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;

    fn temp_store() -> (tempfile::TempDir, GatewayStore) {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("gateway.db")).unwrap();
        run_migrations(&conn).unwrap();
        (dir, GatewayStore::from_connection(Arc::new(Mutex::new(conn))))
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_by_gateway_key() {
        let (_dir, store) = temp_store();
        let a = store
            .get_or_create_conversation("telegram", "telegram:bot1:100", "bot1", "100")
            .await
            .unwrap();
        let b = store
            .get_or_create_conversation("telegram", "telegram:bot1:100", "bot1", "100")
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn context_version_strictly_increases() {
        let (_dir, store) = temp_store();
        let conv = store
            .get_or_create_conversation("telegram", "telegram:bot1:100", "bot1", "100")
            .await
            .unwrap();
        let m1 = store
            .append_context_message(&conv.id, MessageRole::User, "hi", serde_json::json!({}))
            .await
            .unwrap();
        let m2 = store
            .append_context_message(&conv.id, MessageRole::Assistant, "hello", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(m1.context_version, 1);
        assert_eq!(m2.context_version, 2);
    }

    #[tokio::test]
    async fn task_run_lifecycle() {
        let (_dir, store) = temp_store();
        let conv = store
            .get_or_create_conversation("telegram", "telegram:bot1:100", "bot1", "100")
            .await
            .unwrap();
        let msg = store
            .append_context_message(&conv.id, MessageRole::User, "run it", serde_json::json!({}))
            .await
            .unwrap();
        let run = store
            .create_task_run(&conv.id, "sess_telegram_abc123", &msg.id, msg.context_version)
            .await
            .unwrap();
        assert_eq!(run.status, TaskRunStatus::Queued);

        store
            .update_task_run(&run.id, TaskRunStatus::Done, Some("ok".into()), Some(serde_json::json!({"x": 1})))
            .await
            .unwrap();
        let runs = store.list_task_runs(&conv.id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, TaskRunStatus::Done);
        assert_eq!(runs[0].result_summary.as_deref(), Some("ok"));
    }
}
