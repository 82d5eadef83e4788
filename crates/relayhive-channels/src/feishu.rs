//! Feishu (Lark) provider normalization (§6): pure functions covering
//! callback-token verification, URL-verification challenge handling,
//! message-event normalization, and card-action parsing, plus a thin
//! outbound sender. No bot SDK/long-lived client — see `telegram.rs`.

use serde_json::Value;

use relayhive_schema::Event;

/// Feishu signs callbacks with a shared `verification_token`, sent as
/// either `body.token` or `body.header.token` depending on event
/// version. An unset `expected_token` disables the check.
pub fn verify_callback_token(body: &Value, expected_token: Option<&str>) -> bool {
    let Some(expected) = expected_token.filter(|s| !s.is_empty()) else {
        return true;
    };
    let candidates = [
        body.get("token").and_then(Value::as_str),
        body.get("header").and_then(|h| h.get("token")).and_then(Value::as_str),
    ];
    candidates.into_iter().flatten().any(|value| value == expected)
}

/// Feishu's one-time subscription handshake: if `body.type` is
/// `"url_verification"`, echoes back `challenge` for the caller to
/// return verbatim as the HTTP response body.
pub fn maybe_url_verification(body: &Value) -> Option<String> {
    if body.get("type").and_then(Value::as_str) != Some("url_verification") {
        return None;
    }
    body.get("challenge")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_message_content(message_type: &str, raw_content: &Value) -> Value {
    let Some(raw) = raw_content.as_str() else {
        return serde_json::json!({"raw": raw_content});
    };
    if message_type == "text" {
        if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
            if parsed.is_object() {
                return parsed;
            }
        }
    }
    serde_json::json!({"raw": raw})
}

/// Mirrors `telegram::NormalizedUpdate` for the Feishu event shape.
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    pub event_type: String,
    pub source: String,
    pub subject: Option<String>,
    pub payload: Value,
    pub idempotency_key: Option<String>,
}

impl NormalizedMessage {
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
}

/// Normalizes an `im.message.receive_v1` event callback into a
/// `chat.message.received` event. Returns `None` for any other callback
/// shape (card actions go through `parse_card_action` instead).
pub fn normalize_message_event(body: &Value, app_id: Option<&str>) -> Option<NormalizedMessage> {
    let header = body.get("header")?.as_object()?;
    if header.get("event_type").and_then(Value::as_str) != Some("im.message.receive_v1") {
        return None;
    }

    let event_data = body.get("event")?.as_object()?;
    let message = event_data.get("message")?.as_object()?;

    let message_type = message.get("message_type").and_then(Value::as_str).unwrap_or_default();
    let content = message.get("content").cloned().unwrap_or(Value::Null);
    let parsed_content = parse_message_content(message_type, &content);
    let message_id = message.get("message_id").and_then(Value::as_str);
    let event_id = header.get("event_id").and_then(Value::as_str).unwrap_or_default();

    let idempotency_key = message_id
        .filter(|id| !id.is_empty())
        .map(|id| format!("feishu:message:{id}"))
        .or_else(|| (!event_id.is_empty()).then(|| format!("feishu:event:{event_id}")));

    let sender = event_data.get("sender").cloned().unwrap_or(Value::Null);
    let sender_id = sender
        .get("sender_id")
        .and_then(|id| {
            id.get("open_id")
                .or_else(|| id.get("union_id"))
                .or_else(|| id.get("user_id"))
        })
        .and_then(Value::as_str);

    let chat_id = message.get("chat_id").and_then(Value::as_str);
    let mentions = message.get("mentions").cloned().unwrap_or(Value::Null);
    let has_mentions = mentions.as_array().map(|a| !a.is_empty()).unwrap_or(false);

    Some(NormalizedMessage {
        event_type: "chat.message.received".to_string(),
        source: "feishu.gateway".to_string(),
        subject: chat_id.map(str::to_string),
        payload: serde_json::json!({
            "feishu_event_type": "im.message.receive_v1",
            "feishu_event_id": event_id,
            "tenant_key": header.get("tenant_key"),
            "app_id": app_id,
            "chat_id": chat_id,
            "chat_type": message.get("chat_type"),
            "message_id": message_id,
            "message_type": message_type,
            "content": parsed_content,
            "mentions": mentions,
            "sender": sender,
            "sender_id": sender_id,
            "raw_event": event_data,
            "is_mention": has_mentions,
            "is_reply_to_bot": false,
        }),
        idempotency_key,
    })
}

/// Same shape as `telegram::CallbackAction`, parsed from a Feishu
/// interactive-card action payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardAction {
    pub approval_id: Option<String>,
    pub decision: String,
    pub raw_decision: String,
    pub trace_id: Option<String>,
}

pub fn parse_card_action(body: &Value) -> CardAction {
    let action_value = body
        .get("action")
        .and_then(|a| a.get("value"))
        .filter(|v| v.is_object())
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    let raw_decision = action_value
        .get("decision")
        .or_else(|| action_value.get("result"))
        .or_else(|| action_value.get("action"))
        .or_else(|| body.get("decision"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    let decision = if matches!(raw_decision.as_str(), "approve" | "approved" | "pass" | "ok") {
        "approved".to_string()
    } else if matches!(raw_decision.as_str(), "reject" | "rejected" | "deny" | "no") {
        "rejected".to_string()
    } else {
        String::new()
    };

    let approval_id = action_value
        .get("approval_id")
        .or_else(|| body.get("approval_id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let trace_id = action_value
        .get("trace_id")
        .or_else(|| body.get("trace_id"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    CardAction {
        approval_id,
        decision,
        raw_decision,
        trace_id,
    }
}

/// Sends a plain-text message through the Feishu bot messaging API,
/// authenticating with a tenant access token the caller already holds.
pub struct FeishuSender {
    http: reqwest::Client,
}

impl FeishuSender {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }

    pub async fn send_text(&self, tenant_access_token: &str, chat_id: &str, text: &str) -> anyhow::Result<()> {
        let url = "https://open.feishu.cn/open-apis/im/v1/messages?receive_id_type=chat_id";
        let response = self
            .http
            .post(url)
            .bearer_auth(tenant_access_token)
            .json(&serde_json::json!({
                "receive_id": chat_id,
                "msg_type": "text",
                "content": serde_json::to_string(&serde_json::json!({"text": text})).unwrap_or_default(),
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("feishu send message returned {}", response.status());
        }
        Ok(())
    }
}

impl Default for FeishuSender {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_check_accepts_header_token() {
        let body = json!({"header": {"token": "secret"}});
        assert!(verify_callback_token(&body, Some("secret")));
        assert!(!verify_callback_token(&body, Some("other")));
        assert!(verify_callback_token(&body, None));
    }

    #[test]
    fn url_verification_echoes_challenge() {
        let body = json!({"type": "url_verification", "challenge": "abc123"});
        assert_eq!(maybe_url_verification(&body).as_deref(), Some("abc123"));
        assert!(maybe_url_verification(&json!({"type": "event_callback"})).is_none());
    }

    #[test]
    fn normalizes_text_message_event() {
        let body = json!({
            "header": {"event_type": "im.message.receive_v1", "event_id": "ev_1", "tenant_key": "tk"},
            "event": {
                "sender": {"sender_id": {"open_id": "ou_1"}},
                "message": {
                    "message_id": "om_1",
                    "chat_id": "oc_1",
                    "chat_type": "group",
                    "message_type": "text",
                    "content": "{\"text\":\"hello\"}",
                    "mentions": []
                }
            }
        });
        let normalized = normalize_message_event(&body, Some("cli_app")).unwrap();
        assert_eq!(normalized.event_type, "chat.message.received");
        assert_eq!(normalized.subject.as_deref(), Some("oc_1"));
        assert_eq!(normalized.idempotency_key.as_deref(), Some("feishu:message:om_1"));
        assert_eq!(normalized.payload["content"]["text"], "hello");
    }

    #[test]
    fn non_message_event_returns_none() {
        let body = json!({"header": {"event_type": "im.message.reaction_created_v1"}});
        assert!(normalize_message_event(&body, None).is_none());
    }

    #[test]
    fn parses_card_action_decision() {
        let body = json!({"action": {"value": {"decision": "approved", "approval_id": "apr_1"}}});
        let action = parse_card_action(&body);
        assert_eq!(action.decision, "approved");
        assert_eq!(action.approval_id.as_deref(), Some("apr_1"));
    }
}
