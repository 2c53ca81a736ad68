use super::{
    is_ssrf_target, overlay_input_spec, read_integer_param, read_string_array_param,
    resolve_arguments, synthesize_input_schema, truncate_chars, AgentTool, ToolInfo, ToolResult,
};
use crate::config::{
    ToolDescriptor, ToolInputSpec, DEFAULT_EXTRACT_CONCURRENCY, DEFAULT_TOOL_TIMEOUT_SECS,
    MAX_EXTRACTED_CONTENT_CHARS, MIN_EXTRACTED_CONTENT_CHARS,
};
use crate::error::ToolBuildError;
use futures::stream::{self, StreamExt};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use url::Url;

const MAX_URLS_PER_CALL: usize = 20;
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "svg"];

/// Per-URL extraction outcome.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PageContent {
    pub url: String,
    pub title: String,
    pub content: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageContent {
    fn failed(url: &str, error: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            title: String::new(),
            content: String::new(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Fetches pages concurrently and extracts their readable text.
pub struct ContentExtractionTool {
    info: ToolInfo,
    input: ToolInputSpec,
    client: reqwest::Client,
    allow_private_network: bool,
}

fn builtin_input() -> ToolInputSpec {
    serde_json::from_value(json!({
        "body": {
            "urls": {"type": "array", "required": true, "description": "Page URLs to read"},
            "max_concurrent": {"type": "integer", "default": DEFAULT_EXTRACT_CONCURRENCY}
        }
    }))
    .unwrap_or_default()
}

impl ContentExtractionTool {
    pub fn from_descriptor(descriptor: &ToolDescriptor) -> Result<Self, ToolBuildError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(3))
            .timeout(Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS))
            .user_agent(concat!("zalo-advisor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolBuildError::Invalid {
                tool: descriptor.name.clone(),
                reason: e.to_string(),
            })?;

        let input = overlay_input_spec(builtin_input(), &descriptor.input);
        let description = if descriptor.description.is_empty() {
            "Read web pages and return their title and main text".to_string()
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
            client,
            allow_private_network: false,
        })
    }

    #[cfg(test)]
    fn allow_private_network(mut self) -> Self {
        self.allow_private_network = true;
        self
    }

    async fn fetch_one(&self, raw_url: &str) -> PageContent {
        let url = match Url::parse(raw_url) {
            Ok(url) => url,
            Err(e) => return PageContent::failed(raw_url, format!("invalid URL: {e}")),
        };
        if !self.allow_private_network && is_ssrf_target(&url) {
            return PageContent::failed(raw_url, "URL targets a private or internal address");
        }

        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return PageContent::failed(raw_url, e.to_string()),
        };
        if !response.status().is_success() {
            return PageContent::failed(raw_url, format!("status {}", response.status()));
        }
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return PageContent::failed(raw_url, e.to_string()),
        };

        let (title, content) = extract_readable_text(&body);
        let success = content.chars().count() > MIN_EXTRACTED_CONTENT_CHARS;
        PageContent {
            url: raw_url.to_string(),
            title,
            content: truncate_chars(&content, MAX_EXTRACTED_CONTENT_CHARS),
            success,
            error: (!success).then(|| "page has too little readable text".to_string()),
        }
    }
}

/// Title and whitespace-normalized main text of an HTML document.
pub fn extract_readable_text(html: &str) -> (String, String) {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .unwrap_or_default();

    let root = ["article", "main", "body"]
        .iter()
        .filter_map(|tag| Selector::parse(tag).ok())
        .find_map(|sel| document.select(&sel).next());

    let content = match root {
        Some(el) => collect_text(el),
        None => collect_text(document.root_element()),
    };
    (title, content)
}

fn collect_text(element: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let skipped = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| SKIPPED_ELEMENTS.contains(&e.name())))
            .unwrap_or(false);
        if !skipped {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed);
            }
        }
    }
    normalize_whitespace(&parts.join(" "))
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait::async_trait]
impl AgentTool for ContentExtractionTool {
    fn info(&self) -> ToolInfo {
        self.info.clone()
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<ToolResult, String> {
        let args = resolve_arguments(&self.input, &args)?.merged();
        let urls = read_string_array_param(&args, "urls")
            .filter(|u| !u.is_empty())
            .ok_or_else(|| "Missing required parameter: urls".to_string())?;
        if urls.len() > MAX_URLS_PER_CALL {
            return Err(format!("At most {MAX_URLS_PER_CALL} URLs per call"));
        }
        let concurrency = read_integer_param(&args, "max_concurrent")
            .unwrap_or(DEFAULT_EXTRACT_CONCURRENCY as i64)
            .clamp(1, DEFAULT_EXTRACT_CONCURRENCY as i64) as usize;

        debug!(tool = %self.info.name, count = urls.len(), concurrency, "Extracting page content");

        let pages: Vec<PageContent> = stream::iter(urls.iter().cloned())
            .map(|url| async move { self.fetch_one(&url).await })
            .buffered(concurrency)
            .collect()
            .await;

        let succeeded = pages.iter().filter(|p| p.success).count();
        Ok(ToolResult::json(json!({
            "results": pages,
            "succeeded": succeeded,
        })))
    }
}
