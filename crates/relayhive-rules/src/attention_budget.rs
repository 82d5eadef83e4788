//! Process-wide, in-memory daily rate limiter. Resets on restart; callers
//! treat `daily_max <= 0` as unlimited and skip the check entirely.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};

#[derive(Default)]
pub struct AttentionBudget {
    counters: Mutex<HashMap<String, (NaiveDate, i64)>>,
}

impl AttentionBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&self, scope_key: &str, daily_max: i64) -> bool {
        let today = Utc::now().date_naive();
        let mut counters = self.counters.lock().expect("attention budget mutex poisoned");
        let entry = counters
            .entry(scope_key.to_string())
            .or_insert((today, 0));

        if entry.0 != today {
            entry.0 = today;
            entry.1 = 0;
        }

        if entry.1 < daily_max {
            entry.1 += 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_daily_max_then_blocks() {
        let budget = AttentionBudget::new();
        assert!(budget.allow("rule-1:task-1", 2));
        assert!(budget.allow("rule-1:task-1", 2));
        assert!(!budget.allow("rule-1:task-1", 2));
    }

    #[test]
    fn scopes_are_independent() {
        let budget = AttentionBudget::new();
        assert!(budget.allow("rule-1:task-1", 1));
        assert!(budget.allow("rule-1:task-2", 1));
    }
}
