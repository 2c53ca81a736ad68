//! Client for OpenAI-compatible chat completion APIs (Groq, OpenAI, and
//! self-hosted servers speaking the same format).

use super::{ContentBlock, ModelClient, ProviderMessage, ProviderRequest, ProviderResponse};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// OpenAI-Compatible API Types
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct OpenAiRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiResponse {
    pub choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiChoice {
    pub message: OpenAiMessage,
    pub finish_reason: Option<String>,
}

// ============================================================================
// Conversion
// ============================================================================

fn convert_messages(messages: Vec<ProviderMessage>) -> Vec<OpenAiMessage> {
    messages
        .into_iter()
        .map(|m| OpenAiMessage {
            role: m.role,
            content: m.content,
            name: m.name,
            tool_call_id: m.tool_call_id,
            tool_calls: m.tool_calls,
        })
        .collect()
}

pub(crate) fn build_request(request: ProviderRequest) -> OpenAiRequest {
    OpenAiRequest {
        model: request.model,
        messages: convert_messages(request.messages),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        tools: request.tools.filter(|t| !t.is_empty()),
    }
}

/// Parse an OpenAI-compatible response into our ProviderResponse.
pub(crate) fn parse_response(api_resp: OpenAiResponse) -> Result<ProviderResponse> {
    let choice = api_resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No choices in response"))?;

    let mut content = Vec::new();

    if let Some(text) = choice.message.content.as_str() {
        if !text.is_empty() {
            content.push(ContentBlock::Text(text.to_string()));
        }
    }

    for tc in choice.message.tool_calls.unwrap_or_default() {
        let (Some(id), Some(function)) = (tc.get("id").and_then(|v| v.as_str()), tc.get("function"))
        else {
            continue;
        };
        let name = function
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let arguments = function
            .get("arguments")
            .and_then(|v| v.as_str())
            .unwrap_or("{}");
        let input: serde_json::Value = serde_json::from_str(arguments)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
        content.push(ContentBlock::ToolUse {
            id: id.to_string(),
            name,
            input,
        });
    }

    Ok(ProviderResponse {
        content,
        stop_reason: choice.finish_reason,
    })
}

// ============================================================================
// Client
// ============================================================================

/// Live model client.
pub struct OpenAiCompatClient {
    provider: String,
    base_url: String,
    api_key: String,
    client: Client,
}

impl OpenAiCompatClient {
    pub fn new(provider: &str, base_url: String, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("building model HTTP client")?;
        Ok(Self {
            provider: provider.to_string(),
            base_url,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.provider
    }

    fn is_live(&self) -> bool {
        true
    }

    async fn chat(&self, request: ProviderRequest) -> Result<ProviderResponse> {
        let body = build_request(request);

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} request failed", self.provider))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("{} API error ({}): {}", self.provider, status, text);
        }

        let api_resp: OpenAiResponse = resp.json().await?;
        parse_response(api_resp)
    }
}
