use super::{
    build_header_map, resolve_arguments, synthesize_input_schema, truncate_chars, AgentTool,
    ToolInfo, ToolResult,
};
use crate::config::{EndpointConfig, ToolDescriptor, ToolInputSpec};
use crate::error::ToolBuildError;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

const MAX_RESPONSE_CHARS: usize = 50_000;

/// Proxy for an arbitrary HTTP endpoint whose inputs are declared in config.
pub struct GenericEndpointTool {
    info: ToolInfo,
    input: ToolInputSpec,
    method: Method,
    url: Url,
    headers: HeaderMap,
    client: reqwest::Client,
}

impl GenericEndpointTool {
    pub fn from_descriptor(descriptor: &ToolDescriptor) -> Result<Self, ToolBuildError> {
        let missing = |field: &str| ToolBuildError::MissingField {
            tool: descriptor.name.clone(),
            field: field.to_string(),
        };
        let invalid = |reason: String| ToolBuildError::Invalid {
            tool: descriptor.name.clone(),
            reason,
        };

        let endpoint: &EndpointConfig =
            descriptor.endpoint.as_ref().ok_or_else(|| missing("endpoint"))?;
        if endpoint.url.trim().is_empty() {
            return Err(missing("endpoint.url"));
        }
        let url = Url::parse(endpoint.url.trim())
            .map_err(|e| invalid(format!("endpoint.url: {e}")))?;
        let method = Method::from_bytes(endpoint.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|e| invalid(format!("endpoint.method: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs.max(1)))
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        let input = descriptor.input.clone();
        let description = if descriptor.description.is_empty() {
            format!("Call {} {}", method, url)
        } else {
            descriptor.description.clone()
        };

        Ok(Self {
            info: ToolInfo {
                name: descriptor.name.clone(),
                description,
                category: descriptor.category.clone(),
                kind: descriptor.kind,
                dependencies: descriptor.dependencies.clone(),
                input_schema: synthesize_input_schema(&input),
            },
            input,
            method,
            url,
            headers: build_header_map(&endpoint.headers),
            client,
        })
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait::async_trait]
impl AgentTool for GenericEndpointTool {
    fn info(&self) -> ToolInfo {
        self.info.clone()
    }

    async fn invoke(&self, args: Value) -> Result<ToolResult, String> {
        let args = resolve_arguments(&self.input, &args)?;

        let query: Vec<(String, String)> = args
            .param
            .iter()
            .map(|(k, v)| (k.clone(), query_value(v)))
            .collect();

        debug!(tool = %self.info.name, method = %self.method, url = %self.url, "Calling endpoint");

        let mut request = self
            .client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone())
            .query(&query);
        if !args.body.is_empty() {
            request = request.json(&Value::Object(args.body));
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("Endpoint request failed: {e}"))?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("json"))
            .unwrap_or(false);
        let text = response
            .text()
            .await
            .map_err(|e| format!("Failed to read endpoint response: {e}"))?;

        if !status.is_success() {
            return Err(format!(
                "Endpoint returned status {}: {}",
                status.as_u16(),
                truncate_chars(&text, 500)
            ));
        }

        if is_json {
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                return Ok(ToolResult::json(value));
            }
        }
        Ok(ToolResult::text(truncate_chars(&text, MAX_RESPONSE_CHARS)))
    }
}
