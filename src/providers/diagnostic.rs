use super::{ContentBlock, ModelClient, ProviderRequest, ProviderResponse};
use anyhow::Result;
use async_trait::async_trait;

/// Null model client: answers locally with the reason the agent is offline.
#[derive(Debug, Clone)]
pub struct DiagnosticClient {
    reason: String,
}

impl DiagnosticClient {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ModelClient for DiagnosticClient {
    fn name(&self) -> &str {
        "diagnostic"
    }

    fn is_live(&self) -> bool {
        false
    }

    fn unavailable_reason(&self) -> Option<String> {
        Some(self.reason.clone())
    }

    async fn chat(&self, _request: ProviderRequest) -> Result<ProviderResponse> {
        Ok(ProviderResponse {
            content: vec![ContentBlock::Text(format!(
                "The assistant is not available: {}",
                self.reason
            ))],
            stop_reason: Some("diagnostic".to_string()),
        })
    }
}
