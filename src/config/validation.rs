use super::{AgentConfig, FieldDef, ModelProviderKind, Settings, ToolDescriptor};
use crate::error::ConfigError;
use serde::Serialize;
use std::collections::HashSet;

/// Validation errors for configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

impl ConfigValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Tool names become function names on the model API: `[A-Za-z0-9_-]{1,64}`.
fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validate a whole settings tree.
pub fn validate_settings(settings: &Settings) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();
    validate_agent(&settings.agent_config, &mut errors);

    let personal = &settings.zalo_config.personal;
    if !(1..=120).contains(&personal.poll_timeout_secs) {
        errors.push(ConfigValidationError::new(
            "zalo_config.personal.poll_timeout_secs",
            "Poll timeout must be between 1 and 120 seconds",
        ));
    }
    if url::Url::parse(&personal.bridge_url).is_err() {
        errors.push(ConfigValidationError::new(
            "zalo_config.personal.bridge_url",
            "Bridge URL is not a valid URL",
        ));
    }
    if url::Url::parse(&settings.zalo_config.oa.api_base).is_err() {
        errors.push(ConfigValidationError::new(
            "zalo_config.oa.api_base",
            "OA API base is not a valid URL",
        ));
    }

    errors
}

fn validate_agent(agent: &AgentConfig, errors: &mut Vec<ConfigValidationError>) {
    let model = &agent.model;
    if model.name.trim().is_empty() {
        errors.push(ConfigValidationError::new(
            "agent_config.model.name",
            "Model name is required",
        ));
    }
    if !(0.0..=2.0).contains(&model.temperature) {
        errors.push(ConfigValidationError::new(
            "agent_config.model.temperature",
            "Temperature must be between 0 and 2",
        ));
    }
    if model.max_tokens == 0 {
        errors.push(ConfigValidationError::new(
            "agent_config.model.max_tokens",
            "max_tokens must be greater than 0",
        ));
    }
    if model.provider == ModelProviderKind::Custom && model.base_url.is_none() {
        errors.push(ConfigValidationError::new(
            "agent_config.model.base_url",
            "Custom provider requires a base URL",
        ));
    }
    if agent.tool_refresh_interval_secs == 0 {
        errors.push(ConfigValidationError::new(
            "agent_config.tool_refresh_interval_secs",
            "Refresh interval must be at least 1 second",
        ));
    }
    if agent.max_tool_iterations == 0 {
        errors.push(ConfigValidationError::new(
            "agent_config.max_tool_iterations",
            "Iteration cap must be at least 1",
        ));
    }

    let mut seen = HashSet::new();
    for (idx, tool) in agent.tools.iter().enumerate() {
        let path = format!("agent_config.tools[{idx}]");
        if !is_valid_tool_name(&tool.name) {
            errors.push(ConfigValidationError::new(
                format!("{path}.name"),
                format!("Invalid tool name '{}'", tool.name),
            ));
        } else if !seen.insert(tool.name.as_str()) {
            errors.push(ConfigValidationError::new(
                format!("{path}.name"),
                format!("Duplicate tool name '{}'", tool.name),
            ));
        }
        validate_tool_fields(tool, &path, errors);
    }
}

fn validate_tool_fields(tool: &ToolDescriptor, path: &str, errors: &mut Vec<ConfigValidationError>) {
    for name in tool.input.param.keys() {
        if tool.input.body.contains_key(name) {
            errors.push(ConfigValidationError::new(
                format!("{path}.input"),
                format!("Field '{name}' is declared as both param and body"),
            ));
        }
    }

    let all = tool
        .input
        .param
        .iter()
        .map(|f| ("param", f))
        .chain(tool.input.body.iter().map(|f| ("body", f)));
    for (section, (name, def)) in all {
        check_field_default(def, &format!("{path}.input.{section}.{name}"), errors);
    }
}

fn check_field_default(def: &FieldDef, path: &str, errors: &mut Vec<ConfigValidationError>) {
    if let Some(default) = &def.default {
        if !def.field_type.matches(default) {
            errors.push(ConfigValidationError::new(
                format!("{path}.default"),
                format!("Default does not match type '{}'", def.field_type.as_str()),
            ));
        }
    }
}

/// Validate settings and return Result.
pub fn validate_settings_object(settings: &Settings) -> Result<(), ConfigError> {
    let errors = validate_settings(settings);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(value: serde_json::Value) -> ToolDescriptor {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn builtin_defaults_are_valid() {
        assert!(validate_settings(&Settings::default()).is_empty());
    }

    #[test]
    fn duplicate_tool_names_rejected() {
        let mut s = Settings::default();
        s.agent_config.tools = vec![
            tool(json!({"name": "search", "type": "web_search"})),
            tool(json!({"name": "search", "type": "content_extraction"})),
        ];
        let errors = validate_settings(&s);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "agent_config.tools[1].name");
    }

    #[test]
    fn bad_tool_name_rejected() {
        let mut s = Settings::default();
        s.agent_config.tools = vec![tool(json!({"name": "has space", "type": "web_search"}))];
        assert_eq!(validate_settings(&s).len(), 1);
    }

    #[test]
    fn temperature_out_of_range() {
        let mut s = Settings::default();
        s.agent_config.model.temperature = 3.5;
        let errors = validate_settings(&s);
        assert!(errors
            .iter()
            .any(|e| e.path == "agent_config.model.temperature"));
    }

    #[test]
    fn custom_provider_needs_base_url() {
        let mut s = Settings::default();
        s.agent_config.model.provider = ModelProviderKind::Custom;
        assert!(validate_settings(&s)
            .iter()
            .any(|e| e.path == "agent_config.model.base_url"));
    }

    #[test]
    fn default_type_mismatch_rejected() {
        let mut s = Settings::default();
        s.agent_config.tools = vec![tool(json!({
            "name": "lookup",
            "type": "generic_endpoint",
            "endpoint": {"url": "https://example.com"},
            "input": {"param": {"limit": {"type": "integer", "default": "ten"}}}
        }))];
        let errors = validate_settings(&s);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "agent_config.tools[0].input.param.limit.default");
    }

    #[test]
    fn object_result_wraps_errors() {
        let mut s = Settings::default();
        s.agent_config.model.max_tokens = 0;
        let err = validate_settings_object(&s).unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }
}
