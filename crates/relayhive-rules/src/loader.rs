//! Loads `EventRule` definitions from a file or a directory of `*.json`
//! files. Malformed files are skipped with a log line; this loader never
//! panics or bubbles an error for a bad rule file during normal reads.

use std::path::{Path, PathBuf};

use relayhive_schema::EventRule;
use serde_json::Value;

fn seed_rules() -> Vec<EventRule> {
    vec![
        serde_json::from_value(serde_json::json!({
            "id": "rule_tool_exec_failed_notify",
            "name": "rule_tool_exec_failed_notify",
            "event_type": "tool.exec.failed",
            "conditions": {"all": []},
            "action_mode": "suggest",
            "actions": [{"action_type": "notify", "params": {}}],
            "risk_level": "medium",
            "priority": 10,
            "dedupe_window_seconds": 60,
            "cooldown_seconds": 0,
            "attention_budget_per_day": 0,
            "is_active": true
        }))
        .expect("seed rule is well-formed"),
        serde_json::from_value(serde_json::json!({
            "id": "rule_task_failed_notify",
            "name": "rule_task_failed_notify",
            "event_type": "task.failed",
            "conditions": {"all": []},
            "action_mode": "suggest",
            "actions": [{"action_type": "notify", "params": {}}],
            "risk_level": "medium",
            "priority": 10,
            "dedupe_window_seconds": 60,
            "cooldown_seconds": 0,
            "attention_budget_per_day": 0,
            "is_active": true
        }))
        .expect("seed rule is well-formed"),
    ]
}

/// Orders the files a directory-mode load will read: `default.json` first,
/// then the rest in filename order.
pub fn list_rule_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    let Ok(entries) = std::fs::read_dir(path) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    files.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));
    files.sort_by_key(|p| p.file_name().and_then(|n| n.to_str()) != Some("default.json"));
    files
}

fn parse_rule_file(path: &Path) -> Vec<EventRule> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read rule file");
            return Vec::new();
        }
    };
    let value: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "malformed rule file, skipping");
            return Vec::new();
        }
    };
    let items: Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        _ => {
            tracing::warn!(path = %path.display(), "rule file is neither object nor array, skipping");
            return Vec::new();
        }
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<EventRule>(item) {
            Ok(rule) => Some(rule),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "malformed rule entry, skipping");
                None
            }
        })
        .collect()
}

/// Loads rules from `path`, merging by name (falling back to id) across
/// files, later files winning, sorted by `priority` descending.
pub fn load_rules(path: &Path) -> Vec<EventRule> {
    let mut merged: Vec<EventRule> = Vec::new();

    for file in list_rule_files(path) {
        for rule in parse_rule_file(&file) {
            let existing = merged
                .iter()
                .position(|r| r.name == rule.name || r.id == rule.id);
            match existing {
                Some(idx) => merged[idx] = rule,
                None => merged.push(rule),
            }
        }
    }

    merged.sort_by(|a, b| b.priority.cmp(&a.priority));
    merged
}

/// Writes a seed `default.json` under `path` if one does not already exist.
pub fn ensure_default_rules(path: &Path) -> anyhow::Result<()> {
    let default_path = if path.is_dir() || !path.exists() {
        std::fs::create_dir_all(path)?;
        path.join("default.json")
    } else {
        path.to_path_buf()
    };
    if default_path.exists() {
        return Ok(());
    }
    let rules = seed_rules();
    let text = serde_json::to_string_pretty(&rules)?;
    std::fs::write(&default_path, text)?;
    Ok(())
}

/// Flips `is_active` for the rule matching `rule_id` in whichever file of
/// `path` currently defines it.
pub fn set_rule_active(path: &Path, rule_id: &str, active: bool) -> anyhow::Result<bool> {
    for file in list_rule_files(path) {
        let text = std::fs::read_to_string(&file)?;
        let mut value: Value = serde_json::from_str(&text)?;
        let mut changed = false;

        let entries: Vec<&mut Value> = match &mut value {
            Value::Array(items) => items.iter_mut().collect(),
            obj @ Value::Object(_) => vec![obj],
            _ => Vec::new(),
        };

        for entry in entries {
            if entry.get("id").and_then(Value::as_str) == Some(rule_id) {
                if let Some(obj) = entry.as_object_mut() {
                    obj.insert("is_active".to_string(), Value::Bool(active));
                    changed = true;
                }
            }
        }

        if changed {
            std::fs::write(&file, serde_json::to_string_pretty(&value)?)?;
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn default_rules_path() -> PathBuf {
    dirs_home().join(".relayhive").join("rules")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_default_rules_writes_seed_file() {
        let dir = tempfile::tempdir().unwrap();
        let rules_dir = dir.path().join("rules");
        ensure_default_rules(&rules_dir).unwrap();
        assert!(rules_dir.join("default.json").exists());

        let loaded = load_rules(&rules_dir);
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn later_file_overrides_earlier_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.json"),
            serde_json::json!([{
                "id": "r1", "name": "notify-on-fail", "event_type": "tool.exec.failed",
                "priority": 1
            }])
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("overrides.json"),
            serde_json::json!([{
                "id": "r1-new", "name": "notify-on-fail", "event_type": "tool.exec.failed",
                "priority": 99
            }])
            .to_string(),
        )
        .unwrap();

        let loaded = load_rules(dir.path());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].priority, 99);
        assert_eq!(loaded[0].id, "r1-new");
    }

    #[test]
    fn malformed_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let loaded = load_rules(dir.path());
        assert!(loaded.is_empty());
    }

    #[test]
    fn set_rule_active_flips_flag_in_place() {
        let dir = tempfile::tempdir().unwrap();
        ensure_default_rules(&dir.path().join("rules")).unwrap();
        let rules_dir = dir.path().join("rules");
        let changed = set_rule_active(&rules_dir, "rule_task_failed_notify", false).unwrap();
        assert!(changed);
        let loaded = load_rules(&rules_dir);
        let rule = loaded.iter().find(|r| r.id == "rule_task_failed_notify").unwrap();
        assert!(!rule.is_active);
    }
}
