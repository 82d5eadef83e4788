//! Addressing policy decision table (§4.11.1): whether an inbound chat
//! message addresses the bot, and whether that should trigger task
//! execution.

use relayhive_schema::{AddressingDecision, AddressingMode, AddressingPolicy};

/// First matching row wins, per the policy's decision table.
#[allow(clippy::too_many_arguments)]
pub fn decide_addressing(
    text: &str,
    is_mention: bool,
    is_reply_to_bot: bool,
    policy: &AddressingPolicy,
    continuation_hit: bool,
    force_execute: bool,
) -> AddressingDecision {
    if force_execute {
        return AddressingDecision {
            addressed: true,
            should_execute: true,
            reason: "forced".to_string(),
        };
    }

    let trimmed = text.trim();
    if policy
        .command_prefixes
        .iter()
        .any(|prefix| trimmed.starts_with(prefix.as_str()))
    {
        return AddressingDecision {
            addressed: true,
            should_execute: true,
            reason: "command_prefix".to_string(),
        };
    }

    if is_mention {
        return AddressingDecision {
            addressed: true,
            should_execute: true,
            reason: "mention".to_string(),
        };
    }

    if is_reply_to_bot && policy.allow_reply_to_bot {
        return AddressingDecision {
            addressed: true,
            should_execute: true,
            reason: "reply_to_bot".to_string(),
        };
    }

    if policy.mode == AddressingMode::AllMessages {
        return AddressingDecision {
            addressed: true,
            should_execute: true,
            reason: "all_messages_mode".to_string(),
        };
    }

    if continuation_hit {
        return AddressingDecision {
            addressed: true,
            should_execute: true,
            reason: "session_continuation".to_string(),
        };
    }

    AddressingDecision {
        addressed: false,
        should_execute: policy.execute_on_unaddressed,
        reason: "not_addressed".to_string(),
    }
}

/// Returns true if the conversation's most recent assistant message was
/// sent within `window_seconds` of `now` (§4.11.1,
/// `context_service.py::_continuation_hit`).
pub fn continuation_hit(
    latest_assistant_at: Option<chrono::DateTime<chrono::Utc>>,
    now: chrono::DateTime<chrono::Utc>,
    window_seconds: i64,
) -> bool {
    match latest_assistant_at {
        Some(at) => (now - at).num_seconds() <= window_seconds,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn policy(mode: AddressingMode) -> AddressingPolicy {
        AddressingPolicy {
            mode,
            allow_reply_to_bot: true,
            execute_on_unaddressed: false,
            command_prefixes: vec!["/ask".to_string(), "/run".to_string()],
            session_continuation_window_sec: 300,
        }
    }

    #[test]
    fn force_execute_wins_over_everything() {
        let decision = decide_addressing("random text", false, false, &policy(AddressingMode::MentionOnly), false, true);
        assert_eq!(decision.reason, "forced");
        assert!(decision.should_execute);
    }

    #[test]
    fn command_prefix_is_addressed() {
        let decision = decide_addressing("/run build", false, false, &policy(AddressingMode::MentionOnly), false, false);
        assert_eq!(decision.reason, "command_prefix");
    }

    #[test]
    fn mention_only_mode_ignores_unaddressed_text() {
        let decision = decide_addressing("just chatting", false, false, &policy(AddressingMode::MentionOnly), false, false);
        assert!(!decision.addressed);
        assert_eq!(decision.reason, "not_addressed");
        assert!(!decision.should_execute);
    }

    #[test]
    fn all_messages_mode_addresses_everything() {
        let decision = decide_addressing("just chatting", false, false, &policy(AddressingMode::AllMessages), false, false);
        assert!(decision.addressed);
        assert_eq!(decision.reason, "all_messages_mode");
    }

    #[test]
    fn reply_to_bot_requires_policy_to_allow_it() {
        let mut disallowing = policy(AddressingMode::MentionOnly);
        disallowing.allow_reply_to_bot = false;
        let decision = decide_addressing("ok", false, true, &disallowing, false, false);
        assert!(!decision.addressed);

        let allowing = policy(AddressingMode::MentionOnly);
        let decision = decide_addressing("ok", false, true, &allowing, false, false);
        assert_eq!(decision.reason, "reply_to_bot");
    }

    #[test]
    fn continuation_hit_checked_last_for_mention_only() {
        let decision = decide_addressing("continuing", false, false, &policy(AddressingMode::MentionOnly), true, false);
        assert_eq!(decision.reason, "session_continuation");
    }

    #[test]
    fn continuation_window_respects_elapsed_time() {
        let now = fixed_now();
        assert!(continuation_hit(Some(now - Duration::seconds(100)), now, 300));
        assert!(!continuation_hit(Some(now - Duration::seconds(400)), now, 300));
        assert!(!continuation_hit(None, now, 300));
    }

    fn fixed_now() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&chrono::Utc)
    }
}
