//! Zalo Official Account webhook events.

use super::bot::ActivityTracker;
use crate::agents::AgentSession;
use crate::config::{SettingsStore, ZaloOaConfig};
use crate::providers::ProviderMessage;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const EVENT_USER_SEND_TEXT: &str = "user_send_text";
pub const EVENT_FOLLOW: &str = "follow";
pub const EVENT_USER_FOLLOW_OA: &str = "user_follow_oa";

/// Result of handling one verified webhook event. Both variants are
/// acknowledged to Zalo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Acknowledged,
    AcknowledgedWithFailure(String),
}

#[derive(Debug, Default, Deserialize)]
struct WebhookEvent {
    #[serde(default)]
    event_name: String,
    #[serde(default)]
    sender: Option<EventParty>,
    /// Follow events carry the user as `follower`.
    #[serde(default)]
    follower: Option<EventParty>,
    #[serde(default)]
    message: Option<EventMessage>,
}

#[derive(Debug, Deserialize)]
struct EventParty {
    id: String,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct OaApiResponse {
    #[serde(default)]
    error: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OaStatus {
    pub enabled: bool,
    pub configured: bool,
    pub agent_ready: bool,
    pub last_activity: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct ZaloOaChannel {
    store: Arc<SettingsStore>,
    agent: Arc<AgentSession>,
    client: reqwest::Client,
    activity: ActivityTracker,
}

impl ZaloOaChannel {
    pub fn new(store: Arc<SettingsStore>, agent: Arc<AgentSession>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build OA HTTP client")?;
        Ok(Self {
            store,
            agent,
            client,
            activity: ActivityTracker::default(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.store.snapshot().zalo_config.oa.enabled
    }

    /// Webhook signing key, when configured.
    pub fn secret_key(&self) -> Option<String> {
        let secret = self.store.snapshot().zalo_config.oa.secret_key.clone();
        (!secret.is_empty()).then_some(secret)
    }

    pub fn status(&self) -> OaStatus {
        let oa = &self.store.snapshot().zalo_config.oa;
        OaStatus {
            enabled: oa.enabled,
            configured: !oa.secret_key.is_empty() && oa.access_token.is_some(),
            agent_ready: self.agent.controller().ready_resource().is_some(),
            last_activity: self.activity.last(),
        }
    }

    /// Handle an already-verified event body.
    pub async fn handle_event(&self, body: &serde_json::Value) -> WebhookOutcome {
        let event: WebhookEvent = match serde_json::from_value(body.clone()) {
            Ok(event) => event,
            Err(e) => return WebhookOutcome::AcknowledgedWithFailure(format!("invalid payload: {e}")),
        };
        self.activity.touch();

        let result = match event.event_name.as_str() {
            EVENT_USER_SEND_TEXT => {
                let Some(sender) = event.sender else {
                    return WebhookOutcome::AcknowledgedWithFailure("missing sender id".into());
                };
                let text = event.message.map(|m| m.text).unwrap_or_default();
                self.reply_to_text(&sender.id, &text).await
            }
            EVENT_FOLLOW | EVENT_USER_FOLLOW_OA => {
                let Some(user) = event.follower.or(event.sender) else {
                    return WebhookOutcome::AcknowledgedWithFailure("missing follower id".into());
                };
                let welcome = self.store.snapshot().zalo_config.oa.welcome_message.clone();
                self.send_message(&user.id, &welcome).await
            }
            other => {
                debug!(event = other, "Ignoring OA event");
                return WebhookOutcome::Acknowledged;
            }
        };

        match result {
            Ok(()) => WebhookOutcome::Acknowledged,
            Err(e) => {
                warn!(event = %event.event_name, error = %e, "OA event handling failed");
                WebhookOutcome::AcknowledgedWithFailure(e.to_string())
            }
        }
    }

    async fn reply_to_text(&self, user_id: &str, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let reply = self.agent.invoke(vec![ProviderMessage::user(text)]).await;
        let content = if reply.content.trim().is_empty() {
            self.store.snapshot().agent_config.fallback_response.clone()
        } else {
            reply.content
        };
        self.send_message(user_id, &content).await
    }

    /// Send a customer-service text message through the OA API.
    pub async fn send_message(&self, user_id: &str, text: &str) -> Result<()> {
        let settings = self.store.snapshot();
        let oa: &ZaloOaConfig = &settings.zalo_config.oa;
        if !oa.enabled {
            anyhow::bail!("Zalo OA integration is disabled");
        }
        let token = oa
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Zalo OA access token not configured"))?;

        let url = format!("{}/v3.0/oa/message/cs", oa.api_base.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .header("access_token", token)
            .json(&serde_json::json!({
                "recipient": { "user_id": user_id },
                "message": { "text": text },
            }))
            .send()
            .await
            .context("OA send request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("OA API returned {status}: {body}");
        }

        let api: OaApiResponse = resp.json().await.context("malformed OA API reply")?;
        if api.error != 0 {
            anyhow::bail!("OA API error {}: {}", api.error, api.message);
        }
        info!(user = %user_id, "OA message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::providers::DefaultModelClientFactory;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel(dir: &TempDir, server: &MockServer) -> ZaloOaChannel {
        let mut settings = Settings::default();
        settings.zalo_config.oa.enabled = true;
        settings.zalo_config.oa.secret_key = "s3cret".into();
        settings.zalo_config.oa.access_token = Some("oa-token".into());
        settings.zalo_config.oa.api_base = server.uri();
        let store = Arc::new(SettingsStore::with_settings(
            dir.path().join("app_config.json"),
            settings,
        ));
        let agent = Arc::new(AgentSession::new(
            store.clone(),
            Arc::new(DefaultModelClientFactory),
        ));
        ZaloOaChannel::new(store, agent).unwrap()
    }

    #[tokio::test]
    async fn follow_sends_welcome() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3.0/oa/message/cs"))
            .and(header("access_token", "oa-token"))
            .and(body_partial_json(json!({"recipient": {"user_id": "u1"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": 0, "message": "Success"})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let oa = channel(&dir, &server);
        let outcome = oa
            .handle_event(&json!({"event_name": "follow", "follower": {"id": "u1"}}))
            .await;
        assert_eq!(outcome, WebhookOutcome::Acknowledged);
        assert!(oa.status().last_activity.is_some());
    }

    #[tokio::test]
    async fn text_with_disabled_agent_sends_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3.0/oa/message/cs"))
            .and(body_partial_json(json!({
                "message": {"text": crate::config::DEFAULT_FALLBACK_RESPONSE}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": 0})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let outcome = channel(&dir, &server)
            .handle_event(&json!({
                "event_name": "user_send_text",
                "sender": {"id": "u2"},
                "message": {"text": "hello"}
            }))
            .await;
        assert_eq!(outcome, WebhookOutcome::Acknowledged);
    }

    #[tokio::test]
    async fn api_error_is_acknowledged_with_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": -216, "message": "Access token is invalid"})))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let outcome = channel(&dir, &server)
            .handle_event(&json!({"event_name": "user_follow_oa", "sender": {"id": "u3"}}))
            .await;
        assert!(matches!(outcome, WebhookOutcome::AcknowledgedWithFailure(ref m) if m.contains("-216")));
    }

    #[tokio::test]
    async fn unknown_events_are_ignored() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let outcome = channel(&dir, &server)
            .handle_event(&json!({"event_name": "user_send_sticker", "sender": {"id": "u4"}}))
            .await;
        assert_eq!(outcome, WebhookOutcome::Acknowledged);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
