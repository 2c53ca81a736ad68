use super::{
    overlay_input_spec, read_integer_param, read_optional_string_param, read_string_param,
    resolve_arguments, synthesize_input_schema, AgentTool, ToolInfo, ToolResult,
};
use crate::config::{ToolDescriptor, ToolInputSpec, DEFAULT_TOOL_TIMEOUT_SECS};
use crate::error::ToolBuildError;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const MAX_RESULTS: i64 = 20;

#[derive(Debug, Deserialize)]
struct BraveSearchResponse {
    web: Option<BraveWebResults>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResults {
    results: Vec<BraveWebResult>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
}

/// Web search against a Brave-compatible search API.
pub struct WebSearchTool {
    info: ToolInfo,
    input: ToolInputSpec,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

fn builtin_input() -> ToolInputSpec {
    serde_json::from_value(json!({
        "param": {
            "query": {"type": "string", "required": true, "description": "Search query"},
            "num_results": {"type": "integer", "default": 5, "description": "Number of results"},
            "lang": {"type": "string", "default": "vi", "description": "Result language"}
        }
    }))
    .unwrap_or_default()
}

impl WebSearchTool {
    pub fn from_descriptor(descriptor: &ToolDescriptor) -> Result<Self, ToolBuildError> {
        let search = descriptor.search.clone().unwrap_or_default();
        let api_key = search
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("BRAVE_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ToolBuildError::MissingField {
                tool: descriptor.name.clone(),
                field: "search.api_key".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS))
            .build()
            .map_err(|e| ToolBuildError::Invalid {
                tool: descriptor.name.clone(),
                reason: e.to_string(),
            })?;

        let input = overlay_input_spec(builtin_input(), &descriptor.input);
        let description = if descriptor.description.is_empty() {
            "Search the web and return titles, URLs and snippets".to_string()
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
            api_key,
            base_url: search.base_url,
            client,
        })
    }
}

#[async_trait::async_trait]
impl AgentTool for WebSearchTool {
    fn info(&self) -> ToolInfo {
        self.info.clone()
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<ToolResult, String> {
        let args = resolve_arguments(&self.input, &args)?.merged();
        let query = read_string_param(&args, "query")?;
        let count = read_integer_param(&args, "num_results")
            .unwrap_or(5)
            .clamp(1, MAX_RESULTS);
        let lang = read_optional_string_param(&args, "lang");

        debug!(tool = %self.info.name, %query, count, "Running web search");

        let mut query_params = vec![("q", query.clone()), ("count", count.to_string())];
        if let Some(lang) = &lang {
            query_params.push(("search_lang", lang.clone()));
        }

        let response = self
            .client
            .get(&self.base_url)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .query(&query_params)
            .send()
            .await
            .map_err(|e| format!("Search request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("Search API returned status {}", response.status()));
        }

        let body: BraveSearchResponse = response
            .json()
            .await
            .map_err(|e| format!("Invalid search response: {e}"))?;

        let results: Vec<serde_json::Value> = body
            .web
            .map(|w| {
                w.results
                    .into_iter()
                    .take(count as usize)
                    .map(|r| {
                        json!({
                            "title": r.title,
                            "url": r.url,
                            "description": r.description
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ToolResult::json(json!({
            "query": query,
            "results": results,
        })))
    }
}
