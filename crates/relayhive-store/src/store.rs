use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use relayhive_schema::{
    ApprovalRequest, ApprovalStatus, EngineError, EngineResult, Event, EventMetrics, RiskLevel,
    RuleRun, RuleRunStatus,
};
use rusqlite::{params, Connection, OptionalExtension};

use crate::migrations::run_migrations;

/// SQLite-backed persistence for events, rule runs and approvals.
///
/// The connection is wrapped in a plain `std::sync::Mutex` and every method
/// dispatches through `spawn_blocking`, so a slow disk never stalls the
/// tokio runtime the rest of the engine shares.
#[derive(Clone)]
pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let payload_text: String = row.get("payload")?;
    let payload = serde_json::from_str(&payload_text).unwrap_or(serde_json::Value::Null);
    Ok(Event {
        event_id: row.get("event_id")?,
        event_type: row.get("event_type")?,
        source: row.get("source")?,
        subject: row.get("subject")?,
        payload,
        timestamp: row.get("timestamp")?,
        idempotency_key: row.get("idempotency_key")?,
        risk_hint: row
            .get::<_, Option<String>>("risk_hint")?
            .map(|s| RiskLevel::parse(&s)),
    })
}

fn row_to_rule_run(row: &rusqlite::Row) -> rusqlite::Result<RuleRun> {
    let status_text: String = row.get("status")?;
    Ok(RuleRun {
        run_id: row.get("run_id")?,
        rule_id: row.get("rule_id")?,
        event_id: row.get("event_id")?,
        decision: relayhive_schema::ActionMode::parse_or_suggest(&row.get::<_, String>("decision")?),
        reason: row.get("reason")?,
        status: RuleRunStatus::parse(&status_text),
        action_trace_id: row.get("action_trace_id")?,
        duration_ms: row.get("duration_ms")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_approval(row: &rusqlite::Row) -> rusqlite::Result<ApprovalRequest> {
    let status_text: String = row.get("status")?;
    let context_text: String = row.get("context")?;
    Ok(ApprovalRequest {
        approval_id: row.get("approval_id")?,
        rule_id: row.get("rule_id")?,
        event_id: row.get("event_id")?,
        risk_level: RiskLevel::parse(&row.get::<_, String>("risk_level")?),
        context: serde_json::from_str(&context_text).unwrap_or(serde_json::Value::Null),
        status: ApprovalStatus::parse(&status_text),
        created_at: row.get("created_at")?,
        resolved_at: row.get("resolved_at")?,
    })
}

impl EventStore {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Shares the underlying connection so `GatewayStore` can live in the
    /// same on-disk database (§6).
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// Appends an event, failing with `EngineError::DuplicateEvent` if its
    /// idempotency key was already seen.
    pub async fn append(&self, event: Event) -> EngineResult<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().expect("event store mutex poisoned");
            let tx = conn.transaction().map_err(anyhow::Error::from)?;

            if let Some(key) = event.idempotency_key.as_deref() {
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT event_id FROM idempotency WHERE idempotency_key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(anyhow::Error::from)?;
                if existing.is_some() {
                    tracing::debug!(idempotency_key = key, "duplicate event rejected");
                    return Err(EngineError::DuplicateEvent);
                }
            }

            tx.execute(
                "INSERT INTO events (event_id, event_type, source, subject, payload, timestamp, idempotency_key, risk_hint)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.event_id,
                    event.event_type,
                    event.source,
                    event.subject,
                    serde_json::to_string(&event.payload).unwrap_or_default(),
                    event.timestamp,
                    event.idempotency_key,
                    event.risk_hint.map(|r| r.to_string()),
                ],
            )
            .map_err(anyhow::Error::from)?;

            if let Some(key) = event.idempotency_key.as_deref() {
                tx.execute(
                    "INSERT INTO idempotency (idempotency_key, event_id) VALUES (?1, ?2)",
                    params![key, event.event_id],
                )
                .map_err(anyhow::Error::from)?;
            }

            tx.commit().map_err(anyhow::Error::from)?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    /// Exposes the idempotency check independently of `append`, so callers
    /// that must not persist (e.g. a dry-run replay) can still short-circuit.
    pub async fn exists_idempotency(&self, key: &str) -> EngineResult<bool> {
        let conn = self.conn.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("event store mutex poisoned");
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM idempotency WHERE idempotency_key = ?1)",
                    params![key],
                    |row| row.get(0),
                )
                .map_err(|e| EngineError::Internal(e.into()))?;
            Ok(exists)
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn get(&self, event_id: &str) -> EngineResult<Option<Event>> {
        let conn = self.conn.clone();
        let event_id = event_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("event store mutex poisoned");
            conn.query_row(
                "SELECT * FROM events WHERE event_id = ?1",
                params![event_id],
                row_to_event,
            )
            .optional()
            .map_err(|e| EngineError::Internal(e.into()))
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn list_events(
        &self,
        limit: i64,
        event_type: Option<String>,
        event_types: Option<Vec<String>>,
    ) -> EngineResult<Vec<Event>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("event store mutex poisoned");
            list_events_blocking(&conn, limit, event_type.as_deref(), event_types.as_deref(), None)
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    /// Keyset pagination strictly after `(cursor_timestamp, cursor_event_id)`,
    /// ascending, so repeated calls never repeat or skip a row even when new
    /// events are appended between pages.
    pub async fn list_events_after(
        &self,
        cursor: Option<(DateTime<Utc>, String)>,
        limit: i64,
        event_type: Option<String>,
        event_types: Option<Vec<String>>,
    ) -> EngineResult<Vec<Event>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("event store mutex poisoned");
            list_events_blocking(&conn, limit, event_type.as_deref(), event_types.as_deref(), cursor)
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn insert_rule_run(&self, run: RuleRun) -> EngineResult<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("event store mutex poisoned");
            conn.execute(
                "INSERT INTO rule_runs (run_id, rule_id, event_id, decision, reason, status, action_trace_id, duration_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    run.run_id,
                    run.rule_id,
                    run.event_id,
                    run.decision.to_string(),
                    run.reason,
                    run.status.to_string(),
                    run.action_trace_id,
                    run.duration_ms,
                    run.created_at,
                ],
            )
            .map_err(|e| EngineError::Internal(e.into()))?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn update_rule_run(
        &self,
        run_id: &str,
        status: RuleRunStatus,
        reason: Option<String>,
        duration_ms: Option<i64>,
        action_trace_id: Option<String>,
    ) -> EngineResult<()> {
        let conn = self.conn.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("event store mutex poisoned");
            let updated = conn
                .execute(
                    "UPDATE rule_runs SET status = ?1,
                        reason = COALESCE(?2, reason),
                        duration_ms = COALESCE(?3, duration_ms),
                        action_trace_id = COALESCE(?4, action_trace_id)
                     WHERE run_id = ?5",
                    params![status.to_string(), reason, duration_ms, action_trace_id, run_id],
                )
                .map_err(|e| EngineError::Internal(e.into()))?;
            if updated == 0 {
                return Err(EngineError::NotFound(format!("rule_run {run_id}")));
            }
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn list_rule_runs(
        &self,
        rule_id: Option<String>,
        event_id: Option<String>,
        status: Option<RuleRunStatus>,
        limit: i64,
    ) -> EngineResult<Vec<RuleRun>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("event store mutex poisoned");
            let mut sql = String::from("SELECT * FROM rule_runs WHERE 1=1");
            let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(rule_id) = &rule_id {
                sql.push_str(" AND rule_id = ?");
                binds.push(Box::new(rule_id.clone()));
            }
            if let Some(event_id) = &event_id {
                sql.push_str(" AND event_id = ?");
                binds.push(Box::new(event_id.clone()));
            }
            if let Some(status) = status {
                sql.push_str(" AND status = ?");
                binds.push(Box::new(status.to_string()));
            }
            sql.push_str(" ORDER BY created_at DESC LIMIT ?");
            binds.push(Box::new(limit));

            let mut stmt = conn.prepare(&sql).map_err(|e| EngineError::Internal(e.into()))?;
            let params: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
            let rows = stmt
                .query_map(params.as_slice(), row_to_rule_run)
                .map_err(|e| EngineError::Internal(e.into()))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| EngineError::Internal(e.into()))
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    /// True if a prior non-failed run already exists for this (rule, event)
    /// pair; used to short-circuit re-processing on replay.
    pub async fn has_rule_event_run(&self, rule_id: &str, event_id: &str) -> EngineResult<bool> {
        let conn = self.conn.clone();
        let (rule_id, event_id) = (rule_id.to_string(), event_id.to_string());
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("event store mutex poisoned");
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM rule_runs WHERE rule_id = ?1 AND event_id = ?2 AND status != 'failed')",
                    params![rule_id, event_id],
                    |row| row.get(0),
                )
                .map_err(|e| EngineError::Internal(e.into()))?;
            Ok(exists)
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn has_recent_rule_subject_run(
        &self,
        rule_id: &str,
        subject: &str,
        window_seconds: i64,
    ) -> EngineResult<bool> {
        let conn = self.conn.clone();
        let rule_id = rule_id.to_string();
        let subject = subject.to_string();
        let cutoff = Utc::now() - Duration::seconds(window_seconds);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("event store mutex poisoned");
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(
                        SELECT 1 FROM rule_runs rr
                        JOIN events e ON rr.event_id = e.event_id
                        WHERE rr.rule_id = ?1 AND e.subject = ?2
                          AND rr.status != 'skipped' AND rr.created_at >= ?3
                    )",
                    params![rule_id, subject, cutoff],
                    |row| row.get(0),
                )
                .map_err(|e| EngineError::Internal(e.into()))?;
            Ok(exists)
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn get_last_rule_run_at(&self, rule_id: &str) -> EngineResult<Option<DateTime<Utc>>> {
        let conn = self.conn.clone();
        let rule_id = rule_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("event store mutex poisoned");
            conn.query_row(
                "SELECT MAX(created_at) FROM rule_runs WHERE rule_id = ?1 AND status != 'skipped'",
                params![rule_id],
                |row| row.get::<_, Option<DateTime<Utc>>>(0),
            )
            .map_err(|e| EngineError::Internal(e.into()))
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn insert_approval(&self, approval: ApprovalRequest) -> EngineResult<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("event store mutex poisoned");
            conn.execute(
                "INSERT INTO approvals (approval_id, rule_id, event_id, risk_level, context, status, created_at, resolved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    approval.approval_id,
                    approval.rule_id,
                    approval.event_id,
                    approval.risk_level.to_string(),
                    serde_json::to_string(&approval.context).unwrap_or_default(),
                    approval.status.to_string(),
                    approval.created_at,
                    approval.resolved_at,
                ],
            )
            .map_err(|e| EngineError::Internal(e.into()))?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn update_approval(&self, approval_id: &str, status: ApprovalStatus) -> EngineResult<ApprovalRequest> {
        let conn = self.conn.clone();
        let approval_id = approval_id.to_string();
        let resolved_at = Utc::now();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("event store mutex poisoned");
            let updated = conn
                .execute(
                    "UPDATE approvals SET status = ?1, resolved_at = ?2 WHERE approval_id = ?3",
                    params![status.to_string(), resolved_at, approval_id],
                )
                .map_err(|e| EngineError::Internal(e.into()))?;
            if updated == 0 {
                return Err(EngineError::NotFound(format!("approval {approval_id}")));
            }
            conn.query_row(
                "SELECT * FROM approvals WHERE approval_id = ?1",
                params![approval_id],
                row_to_approval,
            )
            .map_err(|e| EngineError::Internal(e.into()))
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn get_approval(&self, approval_id: &str) -> EngineResult<Option<ApprovalRequest>> {
        let conn = self.conn.clone();
        let approval_id = approval_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("event store mutex poisoned");
            conn.query_row(
                "SELECT * FROM approvals WHERE approval_id = ?1",
                params![approval_id],
                row_to_approval,
            )
            .optional()
            .map_err(|e| EngineError::Internal(e.into()))
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn list_pending_approvals(&self) -> EngineResult<Vec<ApprovalRequest>> {
        self.list_approvals(Some(ApprovalStatus::Pending), None).await
    }

    pub async fn list_approvals(
        &self,
        status: Option<ApprovalStatus>,
        limit: Option<i64>,
    ) -> EngineResult<Vec<ApprovalRequest>> {
        let conn = self.conn.clone();
        let limit = limit.unwrap_or(200);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("event store mutex poisoned");
            match &status {
                Some(s) => {
                    let mut stmt = conn
                        .prepare("SELECT * FROM approvals WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2")
                        .map_err(|e| EngineError::Internal(e.into()))?;
                    let rows = stmt
                        .query_map(params![s.to_string(), limit], row_to_approval)
                        .map_err(|e| EngineError::Internal(e.into()))?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(|e| EngineError::Internal(e.into()))
                }
                None => {
                    let mut stmt = conn
                        .prepare("SELECT * FROM approvals ORDER BY created_at DESC LIMIT ?1")
                        .map_err(|e| EngineError::Internal(e.into()))?;
                    let rows = stmt
                        .query_map(params![limit], row_to_approval)
                        .map_err(|e| EngineError::Internal(e.into()))?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(|e| EngineError::Internal(e.into()))
                }
            }
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }

    pub async fn get_metrics(&self, since: Option<DateTime<Utc>>) -> EngineResult<EventMetrics> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("event store mutex poisoned");

            let events_total: i64 = if let Some(since) = &since {
                conn.query_row(
                    "SELECT COUNT(*) FROM events WHERE timestamp >= ?1",
                    params![since],
                    |row| row.get(0),
                )
            } else {
                conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            }
            .map_err(|e| EngineError::Internal(e.into()))?;

            let rule_runs_total: i64 = if let Some(since) = &since {
                conn.query_row(
                    "SELECT COUNT(*) FROM rule_runs WHERE created_at >= ?1",
                    params![since],
                    |row| row.get(0),
                )
            } else {
                conn.query_row("SELECT COUNT(*) FROM rule_runs", [], |row| row.get(0))
            }
            .map_err(|e| EngineError::Internal(e.into()))?;

            let rule_runs_completed: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM rule_runs WHERE status = 'completed'",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| EngineError::Internal(e.into()))?;

            let approvals_total: i64 = conn
                .query_row("SELECT COUNT(*) FROM approvals", [], |row| row.get(0))
                .map_err(|e| EngineError::Internal(e.into()))?;

            let approvals_pending: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM approvals WHERE status = 'pending'",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| EngineError::Internal(e.into()))?;

            Ok(EventMetrics {
                events_total,
                rule_runs_total,
                rule_runs_completed,
                approvals_total,
                approvals_pending,
            })
        })
        .await
        .map_err(|e| EngineError::Internal(e.into()))?
    }
}

fn list_events_blocking(
    conn: &Connection,
    limit: i64,
    event_type: Option<&str>,
    event_types: Option<&[String]>,
    cursor: Option<(DateTime<Utc>, String)>,
) -> EngineResult<Vec<Event>> {
    let mut sql = String::from("SELECT * FROM events WHERE 1=1");
    let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(event_type) = event_type {
        sql.push_str(" AND event_type = ?");
        binds.push(Box::new(event_type.to_string()));
    }
    if let Some(types) = event_types {
        if !types.is_empty() {
            let placeholders = types.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            sql.push_str(&format!(" AND event_type IN ({placeholders})"));
            for t in types {
                binds.push(Box::new(t.clone()));
            }
        }
    }

    let ascending = cursor.is_some();
    if let Some((ts, id)) = cursor {
        sql.push_str(" AND (timestamp, event_id) > (?, ?)");
        binds.push(Box::new(ts));
        binds.push(Box::new(id));
    }

    if ascending {
        sql.push_str(" ORDER BY timestamp ASC, event_id ASC LIMIT ?");
    } else {
        sql.push_str(" ORDER BY timestamp DESC, event_id DESC LIMIT ?");
    }
    binds.push(Box::new(limit));

    let mut stmt = conn.prepare(&sql).map_err(|e| EngineError::Internal(e.into()))?;
    let params_refs: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
    let rows = stmt
        .query_map(params_refs.as_slice(), row_to_event)
        .map_err(|e| EngineError::Internal(e.into()))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Internal(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayhive_schema::RuleDecision;

    fn temp_store() -> (tempfile::TempDir, EventStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(&dir.path().join("events.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn append_dedupes_by_idempotency_key() {
        let (_dir, store) = temp_store();
        let event = Event::new("tool.exec.failed", "toolhost").with_idempotency_key("key-1");
        store.append(event.clone()).await.unwrap();

        let dup = Event::new("tool.exec.failed", "toolhost").with_idempotency_key("key-1");
        let err = store.append(dup).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateEvent));

        let listed = store.list_events(10, None, None).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn cursor_pagination_is_stable() {
        let (_dir, store) = temp_store();
        for i in 0..5 {
            let event = Event::new("task.failed", "agent").with_subject(format!("task-{i}"));
            store.append(event).await.unwrap();
        }

        let first_page = store.list_events_after(None, 2, None, None).await.unwrap();
        assert_eq!(first_page.len(), 2);

        let cursor = (first_page[1].timestamp, first_page[1].event_id.clone());
        let second_page = store
            .list_events_after(Some(cursor), 2, None, None)
            .await
            .unwrap();
        assert_eq!(second_page.len(), 2);
        assert_ne!(second_page[0].event_id, first_page[0].event_id);
        assert_ne!(second_page[0].event_id, first_page[1].event_id);
    }

    #[tokio::test]
    async fn rule_run_dedupe_and_cooldown_lookups() {
        let (_dir, store) = temp_store();
        let event = Event::new("tool.exec.failed", "toolhost");
        store.append(event.clone()).await.unwrap();

        let decision = RuleDecision {
            decision: relayhive_schema::ActionMode::Auto,
            reason: "matched".into(),
            rule_id: "rule-1".into(),
        };
        let run = RuleRun::new_running("rule-1", &event.event_id, &decision);
        store.insert_rule_run(run.clone()).await.unwrap();

        assert!(store
            .has_rule_event_run("rule-1", &event.event_id)
            .await
            .unwrap());

        store
            .update_rule_run(
                &run.run_id,
                RuleRunStatus::Completed,
                Some("ok".into()),
                Some(12),
                None,
            )
            .await
            .unwrap();

        let last_run = store.get_last_rule_run_at("rule-1").await.unwrap();
        assert!(last_run.is_some());
    }

    #[tokio::test]
    async fn approval_lifecycle() {
        let (_dir, store) = temp_store();
        let approval = ApprovalRequest {
            approval_id: "appr_1".into(),
            rule_id: "rule-1".into(),
            event_id: "evt_1".into(),
            risk_level: RiskLevel::High,
            context: serde_json::json!({}),
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        };
        store.insert_approval(approval.clone()).await.unwrap();

        let pending = store.list_pending_approvals().await.unwrap();
        assert_eq!(pending.len(), 1);

        let resolved = store
            .update_approval("appr_1", ApprovalStatus::Approved)
            .await
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert!(resolved.resolved_at.is_some());

        let pending = store.list_pending_approvals().await.unwrap();
        assert!(pending.is_empty());
    }
}
