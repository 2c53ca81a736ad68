//! Explicit construction and wiring of every long-lived component.

use crate::agents::AgentSession;
use crate::channels::{
    spawn_message_pump, BotSession, BridgeConnector, InboundMessage, MessageHandler,
    MessagingConnector, ZaloOaChannel,
};
use crate::config::{AgentConfig, SettingsChange, SettingsSection, SettingsStore};
use crate::gateway::GatewayState;
use crate::providers::{DefaultModelClientFactory, ModelClientFactory};

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct App {
    pub store: Arc<SettingsStore>,
    pub agent: Arc<AgentSession>,
    pub bot: Arc<BotSession>,
    pub oa: Arc<ZaloOaChannel>,
    handler: Arc<MessageHandler>,
    inbound: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    start_time: std::time::Instant,
}

impl App {
    /// Wire components with the production model client and bridge.
    pub fn build(store: Arc<SettingsStore>) -> Result<Arc<Self>> {
        Self::build_with(
            store,
            Arc::new(DefaultModelClientFactory),
            Arc::new(BridgeConnector),
        )
    }

    pub fn build_with(
        store: Arc<SettingsStore>,
        models: Arc<dyn ModelClientFactory>,
        connector: Arc<dyn MessagingConnector>,
    ) -> Result<Arc<Self>> {
        let agent = Arc::new(AgentSession::new(store.clone(), models));
        let (bot, inbound) = BotSession::new(store.clone(), connector);
        let oa = Arc::new(ZaloOaChannel::new(store.clone(), agent.clone())?);
        let handler = Arc::new(MessageHandler::new(agent.clone()));

        Ok(Arc::new(Self {
            store,
            agent,
            bot: Arc::new(bot),
            oa,
            handler,
            inbound: Mutex::new(Some(inbound)),
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            start_time: std::time::Instant::now(),
        }))
    }

    /// Spawn background tasks and bring up sessions enabled in settings.
    pub async fn start(&self) {
        let changes = self.store.subscribe();
        let dispatcher = tokio::spawn(dispatch_changes(
            changes,
            self.agent.clone(),
            self.bot.clone(),
            self.cancel.clone(),
        ));
        self.tasks.lock().push(dispatcher);

        let inbound = self.inbound.lock().take();
        if let Some(inbound) = inbound {
            let pump = spawn_message_pump(
                self.handler.clone(),
                self.bot.clone(),
                inbound,
                self.cancel.clone(),
            );
            self.tasks.lock().push(pump);
        }

        self.agent.start().await;
        self.bot.start().await;
        info!(
            agent = %self.agent.controller().state(),
            bot = %self.bot.controller().state(),
            "Application started"
        );
    }

    /// Stop background tasks and release every session.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                debug!(error = %e, "Background task ended abnormally");
            }
        }
        self.bot.disable().await;
        self.agent.disable().await;
        info!("Application stopped");
    }

    pub fn gateway_state(&self) -> GatewayState {
        GatewayState {
            store: self.store.clone(),
            agent: self.agent.clone(),
            bot: self.bot.clone(),
            oa: self.oa.clone(),
            start_time: self.start_time,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Whether anything besides the tool list differs.
fn agent_runtime_changed(previous: &AgentConfig, current: &AgentConfig) -> bool {
    let strip = |config: &AgentConfig| AgentConfig {
        tools: Vec::new(),
        ..config.clone()
    };
    strip(previous) != strip(current)
}

async fn dispatch_changes(
    mut changes: broadcast::Receiver<SettingsChange>,
    agent: Arc<AgentSession>,
    bot: Arc<BotSession>,
    cancel: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            _ = cancel.cancelled() => break,
            change = changes.recv() => change,
        };
        let change = match change {
            Ok(change) => change,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Settings dispatcher lagged behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        apply_change(&change, &agent, &bot).await;
    }
    debug!("Settings dispatcher stopped");
}

async fn apply_change(change: &SettingsChange, agent: &AgentSession, bot: &BotSession) {
    if change.touches(SettingsSection::Agent) {
        let previous = &change.previous.agent_config;
        let current = &change.current.agent_config;
        if previous.enabled != current.enabled {
            if let Err(e) = agent.controller().handle_config_change(current.enabled).await {
                warn!(session = "agent", error = %e, "Config change not applied");
            }
        } else if agent.controller().is_enabled() {
            if agent.controller().ready_resource().is_none() {
                // An enabled session that failed earlier gets another try.
                if let Err(e) = agent.enable().await {
                    warn!(session = "agent", error = %e, "Retry after config change failed");
                }
            } else if agent_runtime_changed(previous, current) {
                if let Err(e) = agent.reload().await {
                    warn!(session = "agent", error = %e, "Reload after config change failed");
                }
            } else {
                agent.refresh_tools().await;
            }
        }
    }

    if change.touches(SettingsSection::ZaloPersonal) {
        let previous = &change.previous.zalo_config.personal;
        let current = &change.current.zalo_config.personal;
        if previous.enabled != current.enabled {
            if let Err(e) = bot.controller().handle_config_change(current.enabled).await {
                warn!(session = "bot", error = %e, "Config change not applied");
            }
        } else if bot.controller().is_enabled() {
            let result = if bot.controller().ready_resource().is_none() {
                bot.enable().await
            } else {
                bot.reload().await
            };
            if let Err(e) = result {
                warn!(session = "bot", error = %e, "Reconnect after config change failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_only_edits_do_not_need_reload() {
        let previous = AgentConfig::default();
        let mut current = previous.clone();
        current.tools = vec![serde_json::from_value(serde_json::json!({
            "name": "t", "type": "web_search"
        }))
        .unwrap()];
        assert!(!agent_runtime_changed(&previous, &current));

        current.model.temperature = 0.1;
        assert!(agent_runtime_changed(&previous, &current));
    }
}
