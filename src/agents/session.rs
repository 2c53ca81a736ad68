use super::tools::{ToolDescription, ToolRegistry, ToolSet};
use crate::config::{Settings, SettingsStore};
use crate::error::{InvocationError, ResourceInitError};
use crate::lifecycle::{LifecycleController, LifecycleStatus, SessionDriver};
use crate::providers::{ModelClient, ModelClientFactory, ProviderMessage, ProviderRequest};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Resource bound to a Ready agent session. Owns the active tool set, so
/// releasing the session releases every capability instance with it.
pub struct AgentResource {
    pub client: Arc<dyn ModelClient>,
    pub tools: ArcSwap<ToolSet>,
    pub created_at: DateTime<Utc>,
}

/// Agent half of the lifecycle: allocates a model client and the tool set.
pub struct AgentDriver {
    registry: Arc<ToolRegistry>,
    factory: Arc<dyn ModelClientFactory>,
}

impl AgentDriver {
    pub fn new(registry: Arc<ToolRegistry>, factory: Arc<dyn ModelClientFactory>) -> Self {
        Self { registry, factory }
    }
}

#[async_trait]
impl SessionDriver for AgentDriver {
    type Resource = AgentResource;

    fn name(&self) -> &'static str {
        "agent"
    }

    fn is_enabled(&self, settings: &Settings) -> bool {
        settings.agent_config.enabled
    }

    fn enabled_patch(&self, enabled: bool) -> serde_json::Value {
        serde_json::json!({ "agent_config": { "enabled": enabled } })
    }

    async fn acquire(&self, settings: &Settings) -> Result<Arc<AgentResource>, ResourceInitError> {
        let model = &settings.agent_config.model;
        let client = self.factory.create(model);
        if !client.is_live() {
            let reason = client
                .unavailable_reason()
                .unwrap_or_else(|| "model client unavailable".to_string());
            client.close().await;
            return Err(ResourceInitError::MissingCredential(reason));
        }

        let tools = self.registry.build();
        info!(
            provider = client.name(),
            model = %model.name,
            tools = tools.len(),
            "Agent session initialized"
        );
        Ok(Arc::new(AgentResource {
            client,
            tools: ArcSwap::new(tools),
            created_at: Utc::now(),
        }))
    }

    async fn release(&self, resource: Arc<AgentResource>) {
        resource.tools.store(Arc::new(ToolSet::default()));
        self.registry.reset();
        resource.client.close().await;
    }
}

/// Reply from [`AgentSession::invoke`]. Always renderable.
#[derive(Debug, Clone, Serialize)]
pub struct AgentReply {
    pub content: String,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tools_used: Vec<String>,
}

impl AgentReply {
    fn answer(content: String, tools_used: Vec<String>) -> Self {
        Self {
            content,
            degraded: false,
            error: None,
            tools_used,
        }
    }

    fn degraded(content: &str, error: impl std::fmt::Display, tools_used: Vec<String>) -> Self {
        Self {
            content: content.to_string(),
            degraded: true,
            error: Some(error.to_string()),
            tools_used,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    #[serde(flatten)]
    pub lifecycle: LifecycleStatus,
    pub config_enabled: bool,
    pub provider: String,
    pub model: String,
    pub live_client: bool,
    pub tools: Vec<ToolDescription>,
}

/// LLM agent session.
pub struct AgentSession {
    controller: LifecycleController<AgentDriver>,
    registry: Arc<ToolRegistry>,
}

impl AgentSession {
    pub fn new(store: Arc<SettingsStore>, factory: Arc<dyn ModelClientFactory>) -> Self {
        let registry = Arc::new(ToolRegistry::new(store.clone()));
        let driver = AgentDriver::new(registry.clone(), factory);
        Self {
            controller: LifecycleController::new(driver, store),
            registry,
        }
    }

    pub fn controller(&self) -> &LifecycleController<AgentDriver> {
        &self.controller
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn start(&self) {
        self.controller.start().await;
    }

    pub async fn enable(&self) -> Result<(), ResourceInitError> {
        self.controller.enable().await.map(|_| ())
    }

    pub async fn disable(&self) {
        self.controller.disable().await;
    }

    pub async fn reload(&self) -> Result<(), ResourceInitError> {
        self.controller.reload().await.map(|_| ())
    }

    /// Active tool set; empty unless the session is Ready.
    pub fn tools(&self) -> Arc<ToolSet> {
        self.controller
            .ready_resource()
            .map(|resource| resource.tools.load_full())
            .unwrap_or_default()
    }

    /// Rebuild the tool set of the Ready session from current descriptors.
    /// Returns `None` when the session is not Ready.
    pub async fn refresh_tools(&self) -> Option<Arc<ToolSet>> {
        let registry = &self.registry;
        self.controller
            .with_ready(|resource| {
                let set = registry.rebuild(&resource.tools.load());
                resource.tools.store(set.clone());
                set
            })
            .await
    }

    /// Rebuild when the refresh cooldown has elapsed and descriptors changed.
    pub async fn refresh_tools_if_due(&self) -> bool {
        if self.controller.ready_resource().is_none() || !self.registry.is_refresh_due().await {
            return false;
        }
        self.refresh_tools().await.is_some()
    }

    pub fn status(&self) -> AgentStatus {
        let settings = self.controller.store().snapshot();
        let model = &settings.agent_config.model;
        AgentStatus {
            lifecycle: self.controller.status(),
            config_enabled: settings.agent_config.enabled,
            provider: model.provider.as_str().to_string(),
            model: model.name.clone(),
            live_client: self
                .controller
                .ready_resource()
                .map(|r| r.client.is_live())
                .unwrap_or(false),
            tools: self.registry.describe(&self.tools()),
        }
    }

    /// Run a conversation through the model, executing requested tools.
    ///
    /// Never fails: when the session cannot be brought up or a call goes
    /// wrong, the reply is marked degraded and carries the fallback text.
    pub async fn invoke(&self, messages: Vec<ProviderMessage>) -> AgentReply {
        let settings = self.controller.store().snapshot();
        let fallback = settings.agent_config.fallback_response.as_str();

        let resource = match self.controller.ready_resource() {
            Some(resource) => resource,
            None if !self.controller.is_enabled() => {
                return AgentReply::degraded(
                    fallback,
                    InvocationError::Unavailable("agent is disabled".to_string()),
                    Vec::new(),
                );
            }
            None => {
                debug!("Agent not ready, attempting lazy enable");
                match self.controller.enable().await {
                    Ok(resource) => resource,
                    Err(e) => {
                        return AgentReply::degraded(
                            fallback,
                            InvocationError::Unavailable(e.to_string()),
                            Vec::new(),
                        );
                    }
                }
            }
        };

        self.refresh_tools_if_due().await;

        let mut tools_used = Vec::new();
        match self.run_tool_loop(&settings, &resource, messages, &mut tools_used).await {
            Ok(content) if !content.trim().is_empty() => AgentReply::answer(content, tools_used),
            Ok(_) => AgentReply::degraded(fallback, "model returned an empty reply", tools_used),
            Err(e) => {
                warn!(error = %e, "Agent invocation degraded");
                AgentReply::degraded(fallback, e, tools_used)
            }
        }
    }

    async fn run_tool_loop(
        &self,
        settings: &Settings,
        resource: &AgentResource,
        history: Vec<ProviderMessage>,
        tools_used: &mut Vec<String>,
    ) -> Result<String, InvocationError> {
        let agent = &settings.agent_config;
        let tools = resource.tools.load_full();
        let definitions = tools.function_definitions();

        let mut messages = Vec::with_capacity(history.len() + 1);
        if !agent.system_prompt.trim().is_empty() {
            messages.push(ProviderMessage::system(agent.system_prompt.clone()));
        }
        messages.extend(history);

        for iteration in 1..=agent.max_tool_iterations {
            let request = ProviderRequest {
                model: agent.model.name.clone(),
                messages: messages.clone(),
                max_tokens: Some(u64::from(agent.model.max_tokens)),
                temperature: Some(agent.model.temperature),
                tools: Some(definitions.clone()),
            };

            let response = resource
                .client
                .chat(request)
                .await
                .map_err(InvocationError::Model)?;

            let calls = response.tool_calls();
            if calls.is_empty() {
                return Ok(response.content_text());
            }

            let text = response.content_text();
            messages.push(ProviderMessage {
                role: "assistant".to_string(),
                content: if text.is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::Value::String(text)
                },
                name: None,
                tool_call_id: None,
                tool_calls: Some(
                    calls
                        .iter()
                        .map(|(id, name, input)| {
                            serde_json::json!({
                                "id": id,
                                "type": "function",
                                "function": {"name": name, "arguments": input.to_string()}
                            })
                        })
                        .collect(),
                ),
            });

            for (call_id, name, input) in calls {
                debug!(tool = name, iteration, "Executing tool call");
                let result = match tools.get(name) {
                    Some(tool) => match tool.invoke(input.clone()).await {
                        Ok(result) => result.to_model_string(),
                        Err(e) => format!("Error: {e}"),
                    },
                    None => format!("Error: tool '{name}' is not available"),
                };
                tools_used.push(name.to_string());
                messages.push(ProviderMessage::tool_result(call_id, name, result));
            }
        }

        warn!(limit = agent.max_tool_iterations, "Hit max tool iterations");
        Err(InvocationError::IterationLimit(agent.max_tool_iterations))
    }
}
