mod defaults;
mod io;
mod store;
mod types;
mod validation;

pub use defaults::*;
pub use io::*;
pub use store::*;
pub use types::*;
pub use validation::*;

use crate::error::ConfigError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Root settings document (`app_config.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub agent_config: AgentConfig,
    pub zalo_config: ZaloConfig,
}

impl Settings {
    /// Build settings from a JSON tree, enforcing the schema and every
    /// validation rule.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_value(value).map_err(|e| {
            ConfigError::Validation(vec![ConfigValidationError::new("$", e.to_string())])
        })?;
        validate_settings_object(&settings)?;
        Ok(settings)
    }

    /// Write default settings to a file.
    pub fn write_default(path: &Path) -> Result<()> {
        let value = serde_json::to_value(Settings::default())?;
        write_config_file_atomic(path, &value)?;
        Ok(())
    }

    /// Apply environment variable overrides to the settings.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("ZALO_ADVISOR_MODEL_API_KEY") {
            if !key.trim().is_empty() {
                self.agent_config.model.api_key = Some(key);
            }
        }

        if self.agent_config.model.credential().is_none()
            && self.agent_config.model.provider == ModelProviderKind::Groq
        {
            if let Ok(key) = std::env::var("GROQ_API_KEY") {
                if !key.trim().is_empty() {
                    self.agent_config.model.api_key = Some(key);
                }
            }
        }

        if let Ok(secret) = std::env::var("ZALO_OA_SECRET_KEY") {
            self.zalo_config.oa.secret_key = secret;
        }

        if let Ok(token) = std::env::var("ZALO_OA_ACCESS_TOKEN") {
            self.zalo_config.oa.access_token = Some(token);
        }
    }
}

/// Resolve the settings path: explicit flag, then environment, then default.
pub fn resolve_settings_path(path: Option<&str>) -> PathBuf {
    path.map(PathBuf::from)
        .or_else(|| std::env::var("ZALO_ADVISOR_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH))
}

/// Load and validate a settings file, strictly.
pub fn load_settings_file(path: &Path) -> Result<Settings> {
    info!("Loading settings from {}", path.display());
    let value = read_config_file_snapshot(path)?;
    Ok(Settings::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_document_fills_defaults() {
        let s = Settings::from_value(json!({"agent_config": {"enabled": true}})).unwrap();
        assert!(s.agent_config.enabled);
        assert_eq!(s.agent_config.model.name, DEFAULT_MODEL);
        assert_eq!(s.zalo_config.personal.bridge_url, DEFAULT_BRIDGE_URL);
    }

    #[test]
    fn wrong_shape_is_a_validation_error() {
        let err = Settings::from_value(json!({"agent_config": {"enabled": "yes"}})).unwrap_err();
        assert_eq!(err.validation_errors().len(), 1);
        assert_eq!(err.validation_errors()[0].path, "$");
    }

    #[test]
    fn persisted_shape_is_snake_case() {
        let value = serde_json::to_value(Settings::default()).unwrap();
        assert!(value["agent_config"]["model"].get("max_tokens").is_some());
        assert!(value["zalo_config"]["personal"].get("bridge_url").is_some());
        assert_eq!(value["agent_config"]["model"]["provider"], "groq");
    }
}
