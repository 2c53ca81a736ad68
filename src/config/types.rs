use super::defaults::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Agent Configuration
// ============================================================================

/// LLM agent settings (`agent_config`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub enabled: bool,
    pub system_prompt: String,
    pub model: ModelConfig,
    pub tools: Vec<ToolDescriptor>,
    /// Minimum seconds between opportunistic tool refreshes.
    pub tool_refresh_interval_secs: u64,
    pub max_tool_iterations: u32,
    /// Reply sent when the agent produces nothing usable.
    pub fallback_response: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            model: ModelConfig::default(),
            tools: Vec::new(),
            tool_refresh_interval_secs: DEFAULT_TOOL_REFRESH_INTERVAL_SECS,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            fallback_response: DEFAULT_FALLBACK_RESPONSE.to_string(),
        }
    }
}

/// Model provider identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelProviderKind {
    #[default]
    Groq,
    OpenAi,
    Custom,
}

impl ModelProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::OpenAi => "openai",
            Self::Custom => "custom",
        }
    }

    /// Base URL used when the model descriptor does not set one.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::Groq => Some(GROQ_BASE_URL),
            Self::OpenAi => Some(OPENAI_BASE_URL),
            Self::Custom => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: ModelProviderKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProviderKind::Groq,
            name: DEFAULT_MODEL.to_string(),
            api_key: None,
            base_url: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl ModelConfig {
    /// The configured credential, if non-blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn resolved_base_url(&self) -> Option<String> {
        self.base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .or_else(|| self.provider.default_base_url().map(String::from))
    }
}

// ============================================================================
// Tool Descriptors
// ============================================================================

/// Capability type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    WebSearch,
    ContentExtraction,
    GenericEndpoint,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebSearch => "web_search",
            Self::ContentExtraction => "content_extraction",
            Self::GenericEndpoint => "generic_endpoint",
        }
    }
}

/// Primitive type of a declared input field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    pub fn matches(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => matches!(value, Value::Object(_)),
        }
    }
}

/// Declared input field of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Input fields, split by how they travel to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ToolInputSpec {
    /// Query-string parameters.
    pub param: BTreeMap<String, FieldDef>,
    /// JSON body fields.
    pub body: BTreeMap<String, FieldDef>,
}

impl ToolInputSpec {
    pub fn is_empty(&self) -> bool {
        self.param.is_empty() && self.body.is_empty()
    }
}

/// HTTP endpoint bound to a generic-endpoint tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
        }
    }
}

/// Search backend settings for web-search tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Default for SearchProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: BRAVE_SEARCH_URL.to_string(),
        }
    }
}

/// Declarative, persisted definition of a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ToolKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "ToolInputSpec::is_empty")]
    pub input: ToolInputSpec,
    /// Free-form hint describing the result shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchProviderConfig>,
}

fn default_true() -> bool {
    true
}

fn default_category() -> String {
    "general".to_string()
}

// ============================================================================
// Zalo Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ZaloConfig {
    pub oa: ZaloOaConfig,
    pub personal: ZaloPersonalConfig,
}

/// Official Account (webhook) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZaloOaConfig {
    pub enabled: bool,
    pub secret_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub api_base: String,
    pub welcome_message: String,
}

impl Default for ZaloOaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret_key: String::new(),
            access_token: None,
            api_base: ZALO_OA_API_BASE.to_string(),
            welcome_message: DEFAULT_WELCOME_MESSAGE.to_string(),
        }
    }
}

/// Personal-account session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZaloPersonalConfig {
    pub enabled: bool,
    pub phone: String,
    pub password: String,
    pub imei: String,
    pub cookies: BTreeMap<String, String>,
    /// Long-poll bridge that holds the actual account session.
    pub bridge_url: String,
    pub poll_timeout_secs: u64,
}

impl Default for ZaloPersonalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            phone: String::new(),
            password: String::new(),
            imei: String::new(),
            cookies: BTreeMap::new(),
            bridge_url: DEFAULT_BRIDGE_URL.to_string(),
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
        }
    }
}

/// Mask a secret for logs and status output, keeping the last 4 characters.
pub fn redact(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_defaults_fill_in() {
        let d: ToolDescriptor =
            serde_json::from_value(json!({"name": "search", "type": "web_search"})).unwrap();
        assert!(d.enabled);
        assert_eq!(d.category, "general");
        assert!(d.input.is_empty());
        assert!(d.dependencies.is_empty());
    }

    #[test]
    fn unknown_tool_type_is_rejected() {
        let r: Result<ToolDescriptor, _> =
            serde_json::from_value(json!({"name": "x", "type": "shell"}));
        assert!(r.is_err());
    }

    #[test]
    fn field_type_matches_values() {
        assert!(FieldType::Integer.matches(&json!(3)));
        assert!(!FieldType::Integer.matches(&json!(3.5)));
        assert!(FieldType::Number.matches(&json!(3.5)));
        assert!(FieldType::Object.matches(&json!({})));
        assert!(!FieldType::String.matches(&json!(null)));
    }

    #[test]
    fn credential_ignores_blank_keys() {
        let mut m = ModelConfig::default();
        assert!(m.credential().is_none());
        m.api_key = Some("   ".into());
        assert!(m.credential().is_none());
        m.api_key = Some("gsk_abc".into());
        assert_eq!(m.credential(), Some("gsk_abc"));
    }

    #[test]
    fn custom_base_url_wins() {
        let m = ModelConfig {
            provider: ModelProviderKind::Custom,
            base_url: Some("http://localhost:11434/v1/".into()),
            ..ModelConfig::default()
        };
        assert_eq!(m.resolved_base_url().as_deref(), Some("http://localhost:11434/v1"));
    }

    #[test]
    fn redact_keeps_tail() {
        assert_eq!(redact("abcdefgh"), "****efgh");
        assert_eq!(redact("abc"), "****");
    }
}
