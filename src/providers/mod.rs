mod diagnostic;
pub(crate) mod openai_compat;

pub use diagnostic::DiagnosticClient;
pub use openai_compat::OpenAiCompatClient;

use crate::config::ModelConfig;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Provider Types
// ============================================================================

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: String,
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<serde_json::Value>>,
}

impl ProviderMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: serde_json::Value::String(content.into()),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Result of a tool call, fed back to the model.
    pub fn tool_result(call_id: &str, name: &str, content: impl Into<String>) -> Self {
        Self {
            name: Some(name.to_string()),
            tool_call_id: Some(call_id.to_string()),
            ..Self::new("tool", content)
        }
    }
}

/// A request to a model provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<ProviderMessage>,
    pub max_tokens: Option<u64>,
    pub temperature: Option<f64>,
    pub tools: Option<Vec<serde_json::Value>>,
}

/// A response from a model provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
}

impl ProviderResponse {
    pub fn content_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }
}

/// A content block in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContentBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

// ============================================================================
// Client Trait
// ============================================================================

/// Opaque request/response boundary to an LLM.
///
/// Two variants exist: a live network client and a diagnostic client that
/// never leaves the process. The factory picks one, once.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;

    fn is_live(&self) -> bool;

    /// Why this client cannot serve requests, for non-live variants.
    fn unavailable_reason(&self) -> Option<String> {
        None
    }

    async fn chat(&self, request: ProviderRequest) -> Result<ProviderResponse>;

    /// Release any held connections.
    async fn close(&self) {}
}

/// Creates model clients from a model descriptor.
pub trait ModelClientFactory: Send + Sync {
    fn create(&self, config: &ModelConfig) -> Arc<dyn ModelClient>;
}

/// Factory used outside tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultModelClientFactory;

impl ModelClientFactory for DefaultModelClientFactory {
    fn create(&self, config: &ModelConfig) -> Arc<dyn ModelClient> {
        resolve_model_client(config)
    }
}

// ============================================================================
// Client Resolution
// ============================================================================

/// Pick the live client when a credential and endpoint are available,
/// otherwise the diagnostic client.
pub fn resolve_model_client(config: &ModelConfig) -> Arc<dyn ModelClient> {
    let Some(api_key) = config.credential() else {
        return Arc::new(DiagnosticClient::new(format!(
            "no API key configured for provider '{}'",
            config.provider.as_str()
        )));
    };

    let Some(base_url) = config.resolved_base_url() else {
        return Arc::new(DiagnosticClient::new(format!(
            "no base URL for provider '{}'",
            config.provider.as_str()
        )));
    };

    match OpenAiCompatClient::new(config.provider.as_str(), base_url, api_key.to_string()) {
        Ok(client) => Arc::new(client),
        Err(e) => Arc::new(DiagnosticClient::new(format!("HTTP client setup failed: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelProviderKind;

    #[test]
    fn missing_key_yields_diagnostic_client() {
        let client = resolve_model_client(&ModelConfig::default());
        assert!(!client.is_live());
        assert!(client.unavailable_reason().unwrap().contains("groq"));
    }

    #[test]
    fn key_yields_live_client() {
        let config = ModelConfig {
            api_key: Some("gsk_test".into()),
            ..ModelConfig::default()
        };
        let client = resolve_model_client(&config);
        assert!(client.is_live());
        assert_eq!(client.name(), "groq");
    }

    #[test]
    fn custom_provider_without_url_is_diagnostic() {
        let config = ModelConfig {
            provider: ModelProviderKind::Custom,
            api_key: Some("k".into()),
            ..ModelConfig::default()
        };
        assert!(!resolve_model_client(&config).is_live());
    }

    #[test]
    fn response_helpers() {
        let resp = ProviderResponse {
            content: vec![
                ContentBlock::Text("hi ".into()),
                ContentBlock::ToolUse {
                    id: "c1".into(),
                    name: "search".into(),
                    input: serde_json::json!({"query": "x"}),
                },
                ContentBlock::Text("there".into()),
            ],
            stop_reason: None,
        };
        assert_eq!(resp.content_text(), "hi there");
        assert_eq!(resp.tool_calls().len(), 1);
        assert_eq!(resp.tool_calls()[0].1, "search");
    }
}
