//! Versioned schema migrations for the event store, tracked in a
//! `__event_store_schema_version` table. Each migration runs once,
//! synchronously, before the connection is wrapped for async access.

use std::collections::HashSet;

use anyhow::Result;
use rusqlite::Connection;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"CREATE TABLE IF NOT EXISTS __event_store_schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );"#,
    )?;

    let applied: HashSet<i64> = {
        let mut stmt = conn.prepare("SELECT version FROM __event_store_schema_version")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        rows.filter_map(|r| r.ok()).collect()
    };

    let migrations: Vec<(i64, &str)> = vec![(
        1,
        r#"
        CREATE TABLE IF NOT EXISTS events (
            event_id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            source TEXT NOT NULL,
            subject TEXT,
            payload TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            idempotency_key TEXT,
            risk_hint TEXT
        );

        CREATE TABLE IF NOT EXISTS idempotency (
            idempotency_key TEXT PRIMARY KEY,
            event_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rule_runs (
            run_id TEXT PRIMARY KEY,
            rule_id TEXT NOT NULL,
            event_id TEXT NOT NULL,
            decision TEXT NOT NULL,
            reason TEXT NOT NULL,
            status TEXT NOT NULL,
            action_trace_id TEXT,
            duration_ms INTEGER,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS approvals (
            approval_id TEXT PRIMARY KEY,
            rule_id TEXT NOT NULL,
            event_id TEXT NOT NULL,
            risk_level TEXT NOT NULL,
            context TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            resolved_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(timestamp, event_id);
        CREATE INDEX IF NOT EXISTS idx_events_type_created_at ON events(event_type, timestamp);
        CREATE INDEX IF NOT EXISTS idx_rule_runs_rule_event ON rule_runs(rule_id, event_id);
        CREATE INDEX IF NOT EXISTS idx_rule_runs_rule_created ON rule_runs(rule_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_approvals_status_created ON approvals(status, created_at);
        "#,
    ), (
        2,
        r#"
        CREATE TABLE IF NOT EXISTS gateway_conversations (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            gateway_key TEXT NOT NULL UNIQUE,
            bot_id TEXT NOT NULL,
            chat_id TEXT NOT NULL,
            main_context_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS gateway_context_messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata TEXT NOT NULL,
            context_version INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS gateway_task_runs (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            runtime_session_id TEXT NOT NULL,
            source_message_id TEXT NOT NULL,
            snapshot_version INTEGER NOT NULL,
            status TEXT NOT NULL,
            result_summary TEXT,
            result_metadata TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_gateway_conv_provider ON gateway_conversations(provider, updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_gateway_ctx_conv ON gateway_context_messages(conversation_id, context_version);
        CREATE INDEX IF NOT EXISTS idx_gateway_ctx_conv_role_created ON gateway_context_messages(conversation_id, role, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_gateway_runs_conv ON gateway_task_runs(conversation_id, created_at DESC);
        "#,
    )];

    for (version, sql) in migrations {
        if applied.contains(&version) {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO __event_store_schema_version(version) VALUES (?1)",
            [version],
        )?;
        tracing::debug!(version, "applied event store migration");
    }

    Ok(())
}
