use crate::config::ConfigValidationError;
use thiserror::Error;

/// Settings load/update failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration validation failed: {}", join_errors(.0))]
    Validation(Vec<ConfigValidationError>),

    #[error("patch must be a JSON object")]
    InvalidPatch,

    #[error("failed to persist settings to {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn validation_errors(&self) -> &[ConfigValidationError] {
        match self {
            Self::Validation(errors) => errors,
            _ => &[],
        }
    }
}

fn join_errors(errors: &[ConfigValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A session could not reach Ready.
#[derive(Debug, Clone, Error)]
pub enum ResourceInitError {
    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("{0}")]
    Other(String),
}

/// A single descriptor could not be turned into a capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolBuildError {
    #[error("tool '{tool}' depends on unavailable backend '{dependency}'")]
    MissingDependency { tool: String, dependency: String },

    #[error("tool '{tool}' is missing required field '{field}'")]
    MissingField { tool: String, field: String },

    #[error("tool '{tool}' is invalid: {reason}")]
    Invalid { tool: String, reason: String },
}

/// Failure inside a single agent invocation; rendered as a degraded reply.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("agent unavailable: {0}")]
    Unavailable(String),

    #[error("model request failed: {0}")]
    Model(#[source] anyhow::Error),

    #[error("tool loop exceeded {0} iterations")]
    IterationLimit(u32),
}
