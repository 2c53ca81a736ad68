//! Enable/disable/reload state machine shared by the agent and bot sessions.

mod controller;

pub use controller::*;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Disabled,
    Initializing,
    Ready,
    Error,
    ShuttingDown,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a controller.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleStatus {
    pub session: &'static str,
    pub state: LifecycleState,
    pub enabled: bool,
    pub last_error: Option<String>,
    pub last_transition_at: Option<DateTime<Utc>>,
}
