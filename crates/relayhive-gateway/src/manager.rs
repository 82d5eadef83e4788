//! Thin service layer over `RuntimeConfigStore`, `GatewayContextService`,
//! and `EventEngine` (§4.12), grounded on
//! `original_source/runtime/src/gateway/manager.py` and
//! `original_source/runtime/src/server/routes/gateway.py`.

use std::sync::Arc;

use relayhive_channels::{feishu, telegram};
use relayhive_engine::EventEngine;
use relayhive_schema::{
    ApprovalResolution, EngineError, EngineResult, Event, GatewayConfig, GatewayContextMessage, GatewayConversation,
    GatewayTaskRun,
};

use crate::config_store::RuntimeConfigStore;
use crate::context_service::GatewayContextService;

/// Outcome of `ingest_*_webhook`/`ingest_*_card_actions`: either a
/// normalized message was handed to the context service, an approval was
/// resolved, a raw event was emitted, or the payload was a shape this
/// gateway does not recognize.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Challenge { challenge: String },
    Ingested {
        conversation_id: String,
        addressed: bool,
        should_execute: bool,
        address_reason: String,
        task_run_id: Option<String>,
    },
    ApprovalResolved { approval_id: String, resolved: bool, status: String },
    NotRecognized { reason: String },
}

/// The text commands every provider's inbound handler checks before
/// falling back to normal message ingest (§4.12).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextApprovalCommand {
    pub approval_id: String,
    pub approve: bool,
}

/// Recognizes `/approve <id>`, `/reject <id>`, `approve:<id>`,
/// `reject:<id>`, and the Chinese aliases `同意 <id>` / `拒绝 <id>`.
pub fn parse_text_approval_command(text: &str) -> Option<TextApprovalCommand> {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();

    let (approve, rest) = if let Some(rest) = trimmed.strip_prefix("同意") {
        (true, rest)
    } else if let Some(rest) = trimmed.strip_prefix("拒绝") {
        (false, rest)
    } else if let Some(rest) = lower.strip_prefix("/approve") {
        (true, rest)
    } else if let Some(rest) = lower.strip_prefix("/reject") {
        (false, rest)
    } else if let Some(rest) = lower.strip_prefix("approve:") {
        (true, rest)
    } else if let Some(rest) = lower.strip_prefix("reject:") {
        (false, rest)
    } else {
        return None;
    };

    let approval_id = rest.trim().trim_start_matches(':').trim();
    if approval_id.is_empty() {
        return None;
    }
    Some(TextApprovalCommand {
        approval_id: approval_id.to_string(),
        approve,
    })
}

pub struct GatewayManager {
    configs: RuntimeConfigStore,
    context_service: Arc<GatewayContextService>,
    engine: Arc<EventEngine>,
}

impl GatewayManager {
    pub fn new(configs: RuntimeConfigStore, context_service: Arc<GatewayContextService>, engine: Arc<EventEngine>) -> Self {
        Self {
            configs,
            context_service,
            engine,
        }
    }

    pub async fn list_gateway_configs(&self) -> Vec<GatewayConfig> {
        self.configs.list().await
    }

    pub async fn get_gateway_config(&self, provider: &str) -> EngineResult<GatewayConfig> {
        self.configs
            .get(provider)
            .await
            .ok_or_else(|| EngineError::NotFound(format!("gateway config {provider}")))
    }

    pub async fn upsert_gateway_config(&self, config: GatewayConfig) -> EngineResult<GatewayConfig> {
        self.configs.upsert(config).await
    }

    pub async fn list_conversations(&self, provider: Option<String>, limit: i64) -> EngineResult<Vec<GatewayConversation>> {
        self.context_service.list_conversations(provider, limit).await
    }

    pub async fn list_conversation_runs(&self, conversation_id: &str, limit: i64) -> EngineResult<Vec<GatewayTaskRun>> {
        self.context_service.list_task_runs(conversation_id, limit).await
    }

    pub async fn conversation_context(&self, conversation_id: &str, limit: i64) -> EngineResult<Vec<GatewayContextMessage>> {
        self.context_service.list_context(conversation_id, limit).await
    }

    /// Sends a canned test message through the configured provider's
    /// outbound sender, proving out credentials without waiting for an
    /// inbound webhook.
    pub async fn send_outbound_test(&self, provider: &str, chat_id: Option<String>, text: &str) -> EngineResult<()> {
        let config = self.get_gateway_config(provider).await?;
        let chat_id = chat_id
            .or_else(|| config.default_chat_id.clone())
            .ok_or_else(|| EngineError::InvalidInput("no chat_id given or configured".to_string()))?;

        match provider {
            "telegram" => {
                let token = config
                    .bot_token
                    .ok_or_else(|| EngineError::InvalidInput("telegram gateway has no bot_token configured".to_string()))?;
                telegram::TelegramSender::new(token)
                    .send_message(&chat_id, text)
                    .await
                    .map_err(EngineError::Internal)
            }
            "feishu" => {
                let token = config
                    .app_secret
                    .ok_or_else(|| EngineError::InvalidInput("feishu gateway has no tenant access token configured".to_string()))?;
                feishu::FeishuSender::new()
                    .send_text(&token, &chat_id, text)
                    .await
                    .map_err(EngineError::Internal)
            }
            other => Err(EngineError::InvalidInput(format!("unknown provider: {other}"))),
        }
    }

    /// Handles `POST /v1/integrations/telegram/webhook` (§4.12, §6).
    pub async fn ingest_telegram_webhook(
        &self,
        body: serde_json::Value,
        secret_header: Option<&str>,
    ) -> EngineResult<WebhookOutcome> {
        let config = self.get_gateway_config("telegram").await.ok();
        let expected_secret = config.as_ref().and_then(|c| c.webhook_secret.as_deref());
        if !telegram::verify_webhook_secret(secret_header, expected_secret) {
            return Err(EngineError::Unauthorized("telegram webhook secret mismatch".to_string()));
        }

        let action = telegram::parse_callback_action(&body);
        if let Some(approval_id) = action.approval_id {
            if !action.decision.is_empty() {
                return self.resolve_from_decision(&approval_id, &action.decision).await;
            }
        }

        let bot_username = config.as_ref().and_then(|c| c.bot_id.as_deref());
        let bot_id = config.as_ref().and_then(|c| c.bot_id.as_deref()).unwrap_or("telegram_bot");
        let Some(normalized) = telegram::normalize_update(&body, bot_username, Some(bot_id)) else {
            return Ok(WebhookOutcome::NotRecognized { reason: "unrecognized telegram update".to_string() });
        };

        if normalized.event_type == "chat.card.action" {
            let action = telegram::parse_callback_action(&body);
            if let Some(approval_id) = action.approval_id {
                if !action.decision.is_empty() {
                    return self.resolve_from_decision(&approval_id, &action.decision).await;
                }
            }
            self.engine.emit(normalized.into_event()).await;
            return Ok(WebhookOutcome::NotRecognized { reason: "card action without resolvable approval".to_string() });
        }

        let text = normalized.text();
        if let Some(command) = parse_text_approval_command(&text) {
            return self.resolve_from_decision(&command.approval_id, if command.approve { "approved" } else { "rejected" }).await;
        }

        let chat_id = normalized
            .payload
            .get("chat_id")
            .map(|v| v.to_string().trim_matches('"').to_string())
            .unwrap_or_default();
        let policy = config
            .as_ref()
            .and_then(|c| c.addressing_policy.clone())
            .unwrap_or_else(|| relayhive_schema::AddressingPolicy::default_for_provider("telegram"));

        let ingest = self
            .context_service
            .ingest_message(
                "telegram",
                bot_id,
                &chat_id,
                &text,
                normalized.is_mention(),
                normalized.is_reply_to_bot(),
                normalized.payload.clone(),
                &policy,
                "default",
                false,
                None,
            )
            .await?;

        Ok(WebhookOutcome::Ingested {
            conversation_id: ingest.conversation_id,
            addressed: ingest.addressed,
            should_execute: ingest.should_execute,
            address_reason: ingest.address_reason,
            task_run_id: ingest.task_run_id,
        })
    }

    /// Handles `POST /v1/integrations/feishu/events` (§4.12, §6).
    pub async fn ingest_feishu_events(&self, body: serde_json::Value) -> EngineResult<WebhookOutcome> {
        let config = self.get_gateway_config("feishu").await.ok();
        let expected_token = config.as_ref().and_then(|c| c.webhook_secret.as_deref());
        if !feishu::verify_callback_token(&body, expected_token) {
            return Err(EngineError::Unauthorized("feishu callback token mismatch".to_string()));
        }

        if let Some(challenge) = feishu::maybe_url_verification(&body) {
            return Ok(WebhookOutcome::Challenge { challenge });
        }

        let app_id = config.as_ref().and_then(|c| c.app_id.as_deref());
        let Some(normalized) = feishu::normalize_message_event(&body, app_id) else {
            return Ok(WebhookOutcome::NotRecognized { reason: "unrecognized feishu event".to_string() });
        };

        let text = normalized.payload["content"]["text"].as_str().unwrap_or_default().to_string();
        if let Some(command) = parse_text_approval_command(&text) {
            return self.resolve_from_decision(&command.approval_id, if command.approve { "approved" } else { "rejected" }).await;
        }

        let chat_id = normalized.subject.clone().unwrap_or_default();
        let bot_id = app_id.unwrap_or("feishu_app");
        let policy = config
            .as_ref()
            .and_then(|c| c.addressing_policy.clone())
            .unwrap_or_else(|| relayhive_schema::AddressingPolicy::default_for_provider("feishu"));
        let is_mention = normalized.payload.get("is_mention").and_then(serde_json::Value::as_bool).unwrap_or(false);

        let ingest = self
            .context_service
            .ingest_message("feishu", bot_id, &chat_id, &text, is_mention, false, normalized.payload.clone(), &policy, "default", false, None)
            .await?;

        Ok(WebhookOutcome::Ingested {
            conversation_id: ingest.conversation_id,
            addressed: ingest.addressed,
            should_execute: ingest.should_execute,
            address_reason: ingest.address_reason,
            task_run_id: ingest.task_run_id,
        })
    }

    /// Handles `POST /v1/integrations/feishu/card-actions` (§4.12).
    pub async fn ingest_feishu_card_actions(&self, body: serde_json::Value) -> EngineResult<WebhookOutcome> {
        let action = feishu::parse_card_action(&body);
        let Some(approval_id) = action.approval_id else {
            return Ok(WebhookOutcome::NotRecognized { reason: "card action carries no approval_id".to_string() });
        };
        if action.decision.is_empty() {
            return Ok(WebhookOutcome::NotRecognized { reason: "card action decision not recognized".to_string() });
        }
        self.resolve_from_decision(&approval_id, &action.decision).await
    }

    /// Resolves an approval given a normalized `"approved"`/`"rejected"`
    /// decision string shared by every provider's parser.
    async fn resolve_from_decision(&self, approval_id: &str, decision: &str) -> EngineResult<WebhookOutcome> {
        let approve = decision == "approved";
        let ApprovalResolution { resolved, status } = self.engine.resolve_approval(approval_id, approve).await?;
        Ok(WebhookOutcome::ApprovalResolved {
            approval_id: approval_id.to_string(),
            resolved,
            status: status.to_string(),
        })
    }

    /// Emits an arbitrary, already-normalized event through the engine —
    /// used by webhook handlers for event shapes that are neither a chat
    /// message nor an approval action.
    pub async fn emit_raw(&self, event: Event) {
        self.engine.emit(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayhive_runtime::NoopTaskRunner;
    use relayhive_store::{EventStore, GatewayStore};

    async fn manager_with_feishu_token(token: &str) -> GatewayManager {
        let event_store = Arc::new(EventStore::open_in_memory().unwrap());
        let router = Arc::new(relayhive_engine::EventRouter::noop());
        let engine = EventEngine::build(event_store.clone(), router, None).await;
        let gateway_store = GatewayStore::from_connection(event_store.connection());
        let context_service = Arc::new(GatewayContextService::new(
            gateway_store,
            Arc::new(NoopTaskRunner),
            "db".to_string(),
            "rules".to_string(),
        ));
        let dir = tempfile::tempdir().unwrap();
        let configs = RuntimeConfigStore::load(dir.path().join("gateways.json")).unwrap();
        configs
            .upsert(GatewayConfig {
                provider: "feishu".to_string(),
                webhook_secret: Some(token.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        GatewayManager::new(configs, context_service, engine)
    }

    #[tokio::test]
    async fn feishu_url_verification_with_wrong_token_is_unauthorized() {
        let manager = manager_with_feishu_token("token_123").await;
        let body = serde_json::json!({"type": "url_verification", "challenge": "abc", "token": "wrong"});
        let err = manager.ingest_feishu_events(body).await.unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn feishu_url_verification_with_correct_token_echoes_challenge() {
        let manager = manager_with_feishu_token("token_123").await;
        let body = serde_json::json!({"type": "url_verification", "challenge": "abc", "token": "token_123"});
        let outcome = manager.ingest_feishu_events(body).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Challenge { challenge } if challenge == "abc"));
    }

    #[test]
    fn parses_slash_and_colon_commands() {
        assert_eq!(
            parse_text_approval_command("/approve apr_1"),
            Some(TextApprovalCommand { approval_id: "apr_1".to_string(), approve: true })
        );
        assert_eq!(
            parse_text_approval_command("reject:apr_2"),
            Some(TextApprovalCommand { approval_id: "apr_2".to_string(), approve: false })
        );
    }

    #[test]
    fn parses_chinese_aliases() {
        assert_eq!(
            parse_text_approval_command("同意 apr_3"),
            Some(TextApprovalCommand { approval_id: "apr_3".to_string(), approve: true })
        );
        assert_eq!(
            parse_text_approval_command("拒绝 apr_4"),
            Some(TextApprovalCommand { approval_id: "apr_4".to_string(), approve: false })
        );
    }

    #[test]
    fn rejects_commands_without_an_id() {
        assert!(parse_text_approval_command("/approve").is_none());
        assert!(parse_text_approval_command("hello there").is_none());
    }
}
