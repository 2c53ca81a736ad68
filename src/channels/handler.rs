use super::bot::BotSession;
use super::bridge::InboundMessage;
use crate::agents::AgentSession;
use crate::providers::ProviderMessage;

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const COMMANDS: &[(&str, &str)] = &[
    ("help", "Show this help message"),
    ("echo", "Echo back your message"),
    ("info", "Show information about the current chat"),
];

/// Turns inbound chat messages into replies.
pub struct MessageHandler {
    agent: Arc<AgentSession>,
}

impl MessageHandler {
    pub fn new(agent: Arc<AgentSession>) -> Self {
        Self { agent }
    }

    fn fallback(&self) -> String {
        self.agent
            .controller()
            .store()
            .snapshot()
            .agent_config
            .fallback_response
            .clone()
    }

    /// Compute the reply for one message. Never empty.
    pub async fn process(&self, message: &InboundMessage) -> String {
        let text = message.content.trim();
        if let Some(command) = text.strip_prefix('!') {
            return handle_command(command, message);
        }

        debug!(thread = %message.thread_id, "Forwarding message to agent");
        let reply = self.agent.invoke(vec![ProviderMessage::user(text)]).await;
        if reply.degraded {
            warn!(error = ?reply.error, "Agent reply degraded");
        }
        if reply.content.trim().is_empty() {
            return self.fallback();
        }
        reply.content
    }

    /// Process and deliver. A failed send gets at most one fallback attempt.
    pub async fn handle(&self, bot: &BotSession, message: &InboundMessage) {
        info!(
            thread = %message.thread_id,
            author = %message.author_id,
            "Processing inbound message"
        );
        let reply = self.process(message).await;

        if let Err(e) = bot.send_message(&message.thread_id, &reply).await {
            let fallback = self.fallback();
            if reply == fallback {
                error!(error = %e, thread = %message.thread_id, "Fallback send failed");
                return;
            }
            error!(error = %e, thread = %message.thread_id, "Reply send failed, trying fallback");
            if let Err(e) = bot.send_message(&message.thread_id, &fallback).await {
                error!(error = %e, "Fallback send failed");
            }
        }
    }
}

fn handle_command(command: &str, message: &InboundMessage) -> String {
    let mut parts = command.split_whitespace();
    let Some(name) = parts.next() else {
        return "Please specify a command after '!'.".to_string();
    };
    let args: Vec<&str> = parts.collect();

    match name.to_lowercase().as_str() {
        "help" => {
            let mut text = String::from("Available commands:\n");
            for (cmd, desc) in COMMANDS {
                text.push_str(&format!("!{cmd}: {desc}\n"));
            }
            text
        }
        "echo" if args.is_empty() => "Echo what?".to_string(),
        "echo" => args.join(" "),
        "info" => {
            let timestamp = Utc
                .timestamp_millis_opt(message.timestamp_ms)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            let info = serde_json::json!({
                "thread_id": message.thread_id,
                "thread_type": message.thread_type(),
                "author_id": message.author_id,
                "timestamp": timestamp,
            });
            serde_json::to_string_pretty(&info).unwrap_or_else(|_| info.to_string())
        }
        other => format!("Unknown command: {other}. Type !help for available commands."),
    }
}

/// Drain the bot's inbound queue until cancelled or the queue closes.
pub fn spawn_message_pump(
    handler: Arc<MessageHandler>,
    bot: Arc<BotSession>,
    mut inbound: mpsc::Receiver<InboundMessage>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            if message.content.trim().is_empty() {
                continue;
            }
            handler.handle(&bot, &message).await;
        }
        debug!("Message pump stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, SettingsStore, DEFAULT_FALLBACK_RESPONSE};
    use crate::providers::DefaultModelClientFactory;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn message(content: &str) -> InboundMessage {
        serde_json::from_value(json!({
            "msgId": "m1", "threadId": "t9", "uidFrom": "7",
            "content": content, "ts": 1700000000000i64
        }))
        .unwrap()
    }

    fn handler(dir: &TempDir) -> MessageHandler {
        let store = Arc::new(SettingsStore::with_settings(
            dir.path().join("app_config.json"),
            Settings::default(),
        ));
        MessageHandler::new(Arc::new(AgentSession::new(
            store,
            Arc::new(DefaultModelClientFactory),
        )))
    }

    #[tokio::test]
    async fn help_lists_commands() {
        let dir = TempDir::new().unwrap();
        let reply = handler(&dir).process(&message("!help")).await;
        assert!(reply.starts_with("Available commands:"));
        assert!(reply.contains("!echo"));
        assert!(reply.contains("!info"));
    }

    #[tokio::test]
    async fn echo_and_unknown() {
        let dir = TempDir::new().unwrap();
        let h = handler(&dir);
        assert_eq!(h.process(&message("!echo xin  chao")).await, "xin chao");
        assert_eq!(h.process(&message("!echo")).await, "Echo what?");
        assert_eq!(
            h.process(&message("!weather")).await,
            "Unknown command: weather. Type !help for available commands."
        );
        assert_eq!(h.process(&message("!")).await, "Please specify a command after '!'.");
    }

    #[tokio::test]
    async fn info_reports_thread() {
        let dir = TempDir::new().unwrap();
        let reply = handler(&dir).process(&message("!INFO")).await;
        let info: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(info["thread_id"], "t9");
        assert_eq!(info["thread_type"], "user");
        assert!(info["timestamp"].as_str().unwrap().starts_with("2023-11-14"));
    }

    #[tokio::test]
    async fn disabled_agent_falls_back() {
        let dir = TempDir::new().unwrap();
        let reply = handler(&dir).process(&message("what are your hours?")).await;
        assert_eq!(reply, DEFAULT_FALLBACK_RESPONSE);
    }
}
