//! Telegram provider normalization (§6): pure functions that turn a raw
//! webhook body into a normalized gateway event, plus a thin outbound
//! sender used for chat replies and the config "send test message"
//! action. No polling, no `teloxide` dispatcher — webhook decoding is
//! specified as a pure normalization step, the long-running bot client
//! is out of scope (§1).

use serde_json::Value;

use relayhive_schema::Event;

/// `X-Telegram-Bot-Api-Secret-Token` check. An unset `expected_secret`
/// means the gateway was not configured to require one.
pub fn verify_webhook_secret(header_value: Option<&str>, expected_secret: Option<&str>) -> bool {
    let Some(expected) = expected_secret.filter(|s| !s.is_empty()) else {
        return true;
    };
    header_value == Some(expected)
}

fn message_text(message: &Value) -> String {
    if let Some(text) = message.get("text").and_then(Value::as_str) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    message
        .get("caption")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn is_mention(text: &str, entities: Option<&Value>, bot_username: Option<&str>) -> bool {
    if text.is_empty() {
        return false;
    }
    if let Some(username) = bot_username.filter(|u| !u.is_empty()) {
        if text.to_lowercase().contains(&format!("@{}", username.to_lowercase())) {
            return true;
        }
    }
    entities
        .and_then(Value::as_array)
        .map(|items| items.iter().any(|item| item.get("type").and_then(Value::as_str) == Some("mention")))
        .unwrap_or(false)
}

/// One normalized chat message or callback action, ready to hand to
/// `GatewayContextService::ingest_message` or wrap as a raw `Event`.
#[derive(Debug, Clone)]
pub struct NormalizedUpdate {
    pub event_type: String,
    pub source: String,
    pub subject: Option<String>,
    pub payload: Value,
    pub idempotency_key: Option<String>,
}

impl NormalizedUpdate {
    pub fn into_event(self) -> Event {
        let mut event = Event::new(self.event_type, self.source).with_payload(self.payload);
        if let Some(subject) = self.subject {
            event = event.with_subject(subject);
        }
        if let Some(key) = self.idempotency_key {
            event = event.with_idempotency_key(key);
        }
        event
    }

    pub fn is_mention(&self) -> bool {
        self.payload.get("is_mention").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn is_reply_to_bot(&self) -> bool {
        self.payload.get("is_reply_to_bot").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn text(&self) -> String {
        self.payload.get("text").and_then(Value::as_str).unwrap_or_default().to_string()
    }
}

/// Normalizes a Telegram update into a `chat.message.received` or
/// `chat.card.action` event. Returns `None` for updates that carry
/// neither a message nor a callback query.
pub fn normalize_update(body: &Value, bot_username: Option<&str>, bot_id: Option<&str>) -> Option<NormalizedUpdate> {
    let update_id = body.get("update_id");
    let idempotency_key = update_id.map(|id| format!("telegram:update:{id}"));

    let message = body
        .get("message")
        .filter(|m| m.is_object())
        .or_else(|| body.get("edited_message").filter(|m| m.is_object()));

    if let Some(message) = message {
        let chat = message.get("chat").cloned().unwrap_or(Value::Null);
        let chat_id = chat.get("id");
        let text = message_text(message);
        let sender = message.get("from").cloned().unwrap_or(Value::Null);
        let mentioned = is_mention(&text, message.get("entities"), bot_username);
        let reply_to = message.get("reply_to_message");
        let is_reply_to_bot = reply_to
            .and_then(|r| r.get("from"))
            .and_then(|f| f.get("is_bot"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let subject = chat_id.map(|id| id.to_string().trim_matches('"').to_string());
        return Some(NormalizedUpdate {
            event_type: "chat.message.received".to_string(),
            source: "telegram.gateway".to_string(),
            subject: subject.clone(),
            payload: serde_json::json!({
                "telegram_update_id": update_id,
                "message_id": message.get("message_id"),
                "chat_id": chat_id,
                "bot_id": bot_id,
                "chat_type": chat.get("type"),
                "sender": sender,
                "sender_id": sender.get("id"),
                "text": text,
                "is_mention": mentioned,
                "is_reply_to_bot": is_reply_to_bot,
                "raw_update": body,
            }),
            idempotency_key,
        });
    }

    let callback_query = body.get("callback_query")?;
    let data = callback_query.get("data").and_then(Value::as_str).unwrap_or_default();
    let callback_message = callback_query.get("message");
    let chat_id = callback_message.and_then(|m| m.get("chat")).and_then(|c| c.get("id"));
    let sender = callback_query.get("from").cloned().unwrap_or(Value::Null);
    let subject = chat_id
        .map(|id| id.to_string().trim_matches('"').to_string())
        .or_else(|| sender.get("id").map(|id| id.to_string().trim_matches('"').to_string()));

    Some(NormalizedUpdate {
        event_type: "chat.card.action".to_string(),
        source: "telegram.gateway".to_string(),
        subject,
        payload: serde_json::json!({
            "telegram_update_id": update_id,
            "callback_query_id": callback_query.get("id"),
            "chat_id": chat_id,
            "bot_id": bot_id,
            "sender": sender,
            "sender_id": sender.get("id"),
            "text": data,
            "is_mention": false,
            "is_reply_to_bot": false,
            "raw_update": body,
        }),
        idempotency_key,
    })
}

/// Outcome of parsing a Telegram callback-query payload as an approval
/// resolution action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackAction {
    pub approval_id: Option<String>,
    pub decision: String,
    pub raw_decision: String,
    pub trace_id: Option<String>,
}

/// Parses `callback_query.data` for an approve/reject decision, either as
/// JSON (`{"decision": "approved", "approval_id": "..."}`) or as the
/// plain-text forms `approve:<id>` / `reject:<id>` / `/approve <id>`.
pub fn parse_callback_action(body: &Value) -> CallbackAction {
    let Some(callback_query) = body.get("callback_query") else {
        return CallbackAction::default();
    };
    let mut raw_data = callback_query.get("data").and_then(Value::as_str).unwrap_or_default().trim().to_string();

    let mut approval_id = None;
    let mut trace_id = None;

    if let Ok(parsed) = serde_json::from_str::<Value>(&raw_data) {
        if let Some(obj) = parsed.as_object() {
            let raw_decision = obj
                .get("decision")
                .or_else(|| obj.get("action"))
                .or_else(|| obj.get("result"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            approval_id = obj.get("approval_id").and_then(Value::as_str).map(|s| s.trim().to_string());
            trace_id = obj.get("trace_id").and_then(Value::as_str).map(|s| s.trim().to_string());
            if !raw_decision.is_empty() {
                raw_data = raw_decision;
            }
        }
    }

    let lower = raw_data.to_lowercase();
    let mut decision = String::new();

    if lower.contains(':') && approval_id.is_none() {
        let (prefix, suffix) = lower.split_once(':').unwrap();
        if matches!(prefix, "approve" | "approved" | "pass" | "ok") {
            decision = "approved".to_string();
            approval_id = (!suffix.trim().is_empty()).then(|| suffix.trim().to_string());
        } else if matches!(prefix, "reject" | "rejected" | "deny" | "no") {
            decision = "rejected".to_string();
            approval_id = (!suffix.trim().is_empty()).then(|| suffix.trim().to_string());
        }
    }

    if decision.is_empty() {
        if matches!(lower.as_str(), "approve" | "approved" | "pass" | "ok") {
            decision = "approved".to_string();
        } else if matches!(lower.as_str(), "reject" | "rejected" | "deny" | "no") {
            decision = "rejected".to_string();
        } else if lower.starts_with("/approve") {
            decision = "approved".to_string();
            if approval_id.is_none() {
                approval_id = Some(lower.replacen("/approve", "", 1).trim().to_string()).filter(|s| !s.is_empty());
            }
        } else if lower.starts_with("/reject") {
            decision = "rejected".to_string();
            if approval_id.is_none() {
                approval_id = Some(lower.replacen("/reject", "", 1).trim().to_string()).filter(|s| !s.is_empty());
            }
        }
    }

    CallbackAction {
        approval_id,
        decision,
        raw_decision: lower,
        trace_id,
    }
}

/// Sends a plain-text message through the Telegram Bot HTTP API.
/// Outbound transport only — no polling/dispatcher client (§1 non-goal).
pub struct TelegramSender {
    http: reqwest::Client,
    bot_token: String,
}

impl TelegramSender {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token: bot_token.into(),
        }
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({"chat_id": chat_id, "text": text}))
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("telegram sendMessage returned {}", response.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secret_matches_required_header() {
        assert!(verify_webhook_secret(Some("abc"), Some("abc")));
        assert!(!verify_webhook_secret(Some("wrong"), Some("abc")));
        assert!(!verify_webhook_secret(None, Some("abc")));
        assert!(verify_webhook_secret(None, None));
    }

    #[test]
    fn normalizes_plain_message() {
        let body = json!({
            "update_id": 42,
            "message": {
                "message_id": 7,
                "chat": {"id": -100001, "type": "group"},
                "from": {"id": 555, "is_bot": false},
                "text": "hello semibot"
            }
        });
        let normalized = normalize_update(&body, Some("semibot"), Some("bot1")).unwrap();
        assert_eq!(normalized.event_type, "chat.message.received");
        assert_eq!(normalized.idempotency_key.as_deref(), Some("telegram:update:42"));
        assert_eq!(normalized.subject.as_deref(), Some("-100001"));
        assert!(!normalized.is_mention());
    }

    #[test]
    fn detects_username_mention() {
        let body = json!({
            "update_id": 43,
            "message": {
                "chat": {"id": 1},
                "text": "@semibot hello again"
            }
        });
        let normalized = normalize_update(&body, Some("semibot"), None).unwrap();
        assert!(normalized.is_mention());
    }

    #[test]
    fn unrecognized_update_returns_none() {
        assert!(normalize_update(&json!({"update_id": 1}), None, None).is_none());
    }

    #[test]
    fn parses_colon_form_callback() {
        let body = json!({"callback_query": {"data": "approve:apr_123"}});
        let action = parse_callback_action(&body);
        assert_eq!(action.decision, "approved");
        assert_eq!(action.approval_id.as_deref(), Some("apr_123"));
    }

    #[test]
    fn parses_json_form_callback() {
        let body = json!({"callback_query": {"data": "{\"decision\":\"rejected\",\"approval_id\":\"apr_9\"}"}});
        let action = parse_callback_action(&body);
        assert_eq!(action.decision, "rejected");
        assert_eq!(action.approval_id.as_deref(), Some("apr_9"));
    }

    #[test]
    fn parses_slash_command_callback() {
        let body = json!({"callback_query": {"data": "/approve apr_5"}});
        let action = parse_callback_action(&body);
        assert_eq!(action.decision, "approved");
        assert_eq!(action.approval_id.as_deref(), Some("apr_5"));
    }
}
