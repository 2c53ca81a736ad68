mod common;
mod content_extract;
mod generic_endpoint;
mod registry;
mod schema;
mod web_search;

pub use common::*;
pub use content_extract::ContentExtractionTool;
pub use generic_endpoint::GenericEndpointTool;
pub use registry::*;
pub use schema::*;
pub use web_search::WebSearchTool;

use crate::config::ToolKind;
use serde::{Deserialize, Serialize};

// ============================================================================
// Tool System
// ============================================================================

/// Information about an active tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub category: String,
    pub kind: ToolKind,
    pub dependencies: Vec<String>,
    pub input_schema: serde_json::Value,
}

impl ToolInfo {
    /// Function definition in the OpenAI tool-calling format.
    pub fn function_definition(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

/// Result from invoking a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            json: None,
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self {
            text: None,
            json: Some(value),
        }
    }

    /// Render for a model tool message.
    pub fn to_model_string(&self) -> String {
        match (&self.json, &self.text) {
            (Some(json), _) => json.to_string(),
            (None, Some(text)) => text.clone(),
            (None, None) => String::new(),
        }
    }
}

/// A capability bound to one descriptor.
///
/// Every kind exposes the same contract: named arguments in, a structured
/// result or an error string out.
#[async_trait::async_trait]
pub trait AgentTool: Send + Sync {
    fn info(&self) -> ToolInfo;

    async fn invoke(&self, args: serde_json::Value) -> Result<ToolResult, String>;
}
