//! Pure condition evaluation: no I/O, no mutation, safe to call from any
//! thread for every event on the hot path.

use relayhive_schema::Event;
use serde_json::Value;

/// Evaluates a condition tree against an event. `conditions` is one of
/// `{"all": [...]}`, `{"any": [...]}`, `{"not": {...}}`, or a leaf
/// `{"field", "op", "value"}`. An empty `all` matches everything.
pub fn evaluate(conditions: &Value, event: &Event) -> bool {
    let Some(obj) = conditions.as_object() else {
        return true;
    };

    if let Some(children) = obj.get("all").and_then(Value::as_array) {
        return children.iter().all(|c| evaluate(c, event));
    }
    if let Some(children) = obj.get("any").and_then(Value::as_array) {
        return children.iter().any(|c| evaluate(c, event));
    }
    if let Some(inner) = obj.get("not") {
        return !evaluate(inner, event);
    }

    let (Some(field), Some(op)) = (
        obj.get("field").and_then(Value::as_str),
        obj.get("op").and_then(Value::as_str),
    ) else {
        return true;
    };
    let target = obj.get("value").cloned().unwrap_or(Value::Null);
    let resolved = resolve_field(event, field);
    evaluate_leaf(resolved.as_ref(), op, &target)
}

fn event_as_value(event: &Event) -> Value {
    serde_json::to_value(event).unwrap_or(Value::Null)
}

/// Resolves a dotted path (e.g. `payload.tool.name`) against the event.
/// `None` means the path did not resolve to anything (absent).
fn resolve_field(event: &Event, path: &str) -> Option<Value> {
    let root = event_as_value(event);
    let mut current = &root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

fn evaluate_leaf(resolved: Option<&Value>, op: &str, target: &Value) -> bool {
    // A missing field resolves as absent/null: equal only to an explicit
    // null target, never-equal otherwise, and false for every other op.
    let resolved = resolved.cloned().unwrap_or(Value::Null);

    match op {
        "eq" => resolved == *target,
        "ne" => resolved != *target,
        "gt" | "gte" | "lt" | "lte" => match (as_f64(&resolved), as_f64(target)) {
            (Some(a), Some(b)) => match op {
                "gt" => a > b,
                "gte" => a >= b,
                "lt" => a < b,
                "lte" => a <= b,
                _ => unreachable!(),
            },
            _ => false,
        },
        "in" => target
            .as_array()
            .map(|items| items.iter().any(|v| *v == resolved))
            .unwrap_or(false),
        "nin" => target
            .as_array()
            .map(|items| !items.iter().any(|v| *v == resolved))
            .unwrap_or(true),
        "contains" => match (resolved.as_str(), target.as_str()) {
            (Some(haystack), Some(needle)) => haystack.contains(needle),
            _ => resolved
                .as_array()
                .map(|items| items.iter().any(|v| v == target))
                .unwrap_or(false),
        },
        "startswith" => match (resolved.as_str(), target.as_str()) {
            (Some(haystack), Some(prefix)) => haystack.starts_with(prefix),
            _ => false,
        },
        "endswith" => match (resolved.as_str(), target.as_str()) {
            (Some(haystack), Some(suffix)) => haystack.ends_with(suffix),
            _ => false,
        },
        "regex" => match (resolved.as_str(), target.as_str()) {
            (Some(haystack), Some(pattern)) => regex::Regex::new(pattern)
                .map(|re| re.is_match(haystack))
                .unwrap_or(false),
            _ => false,
        },
        _ => false,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event() -> Event {
        Event::new("tool.exec.failed", "toolhost")
            .with_subject("task-42")
            .with_payload(json!({"tool": {"name": "curl", "exit_code": 7}}))
    }

    #[test]
    fn empty_all_matches_everything() {
        assert!(evaluate(&json!({"all": []}), &sample_event()));
    }

    #[test]
    fn leaf_eq_on_nested_payload_field() {
        let cond = json!({"field": "payload.tool.name", "op": "eq", "value": "curl"});
        assert!(evaluate(&cond, &sample_event()));
    }

    #[test]
    fn missing_field_eq_nonnull_is_false() {
        let cond = json!({"field": "payload.tool.missing", "op": "eq", "value": "x"});
        assert!(!evaluate(&cond, &sample_event()));
    }

    #[test]
    fn missing_field_ne_null_is_false() {
        let cond = json!({"field": "payload.tool.missing", "op": "ne", "value": null});
        assert!(!evaluate(&cond, &sample_event()));
    }

    #[test]
    fn any_and_not_compose() {
        let cond = json!({
            "any": [
                {"field": "payload.tool.exit_code", "op": "gte", "value": 10},
                {"not": {"field": "payload.tool.name", "op": "eq", "value": "wget"}}
            ]
        });
        assert!(evaluate(&cond, &sample_event()));
    }

    #[test]
    fn regex_matches_subject() {
        let cond = json!({"field": "subject", "op": "regex", "value": "^task-\\d+$"});
        assert!(evaluate(&cond, &sample_event()));
    }
}
