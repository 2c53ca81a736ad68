//! Personal-account transport.
//!
//! The account session itself lives in a bridge process; this side talks to it
//! over HTTP long-poll.

use crate::config::{redact, ZaloPersonalConfig};
use crate::error::ResourceInitError;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One inbound chat message as reported by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "msgId")]
    pub message_id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
    #[serde(rename = "uidFrom")]
    pub author_id: String,
    #[serde(rename = "dName", default)]
    pub author_name: String,
    #[serde(default)]
    pub content: String,
    /// Milliseconds since the epoch.
    #[serde(rename = "ts", default)]
    pub timestamp_ms: i64,
    #[serde(rename = "isGroup", default)]
    pub is_group: bool,
}

impl InboundMessage {
    /// Messages authored by the logged-in account. The bridge reports those
    /// with a `"0"` sender id.
    pub fn is_from_self(&self, account_id: &str) -> bool {
        self.author_id == "0" || (!account_id.is_empty() && self.author_id == account_id)
    }

    pub fn thread_type(&self) -> &'static str {
        if self.is_group {
            "group"
        } else {
            "user"
        }
    }
}

/// One conversation in the account's thread list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    #[serde(rename = "threadId")]
    pub thread_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "isGroup", default)]
    pub is_group: bool,
    #[serde(rename = "lastMessage", default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    /// Milliseconds since the epoch of the latest activity.
    #[serde(rename = "ts", default)]
    pub timestamp_ms: i64,
}

/// Marks one message as read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub thread_id: String,
    pub message_id: String,
    pub client_message_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub is_group: bool,
}

/// Opens a live messaging connection.
#[async_trait]
pub trait MessagingConnector: Send + Sync {
    async fn connect(
        &self,
        config: &ZaloPersonalConfig,
    ) -> Result<Arc<dyn MessagingConnection>, ResourceInitError>;
}

/// A live, authenticated messaging connection.
#[async_trait]
pub trait MessagingConnection: Send + Sync {
    fn account_id(&self) -> &str;

    /// Wait for the next batch of messages. Dropping the future cancels the
    /// poll.
    async fn receive(&self) -> Result<Vec<InboundMessage>>;

    async fn send_text(&self, thread_id: &str, text: &str) -> Result<()>;

    async fn fetch_threads(&self) -> Result<Vec<ThreadSummary>> {
        anyhow::bail!("thread listing is not supported by this connection")
    }

    /// Most recent messages of one thread, oldest first.
    async fn fetch_messages(&self, _thread_id: &str, _limit: u32) -> Result<Vec<InboundMessage>> {
        anyhow::bail!("message history is not supported by this connection")
    }

    async fn mark_read(&self, _receipt: &ReadReceipt) -> Result<()> {
        anyhow::bail!("read receipts are not supported by this connection")
    }

    async fn close(&self);
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    phone: &'a str,
    imei: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    password: &'a str,
    cookies: &'a std::collections::BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct SessionResponse {
    session_id: String,
    #[serde(default)]
    account: String,
}

#[derive(Deserialize)]
struct UpdatesResponse {
    #[serde(default)]
    messages: Vec<InboundMessage>,
}

#[derive(Deserialize)]
struct ThreadsResponse {
    #[serde(default)]
    threads: Vec<ThreadSummary>,
}

/// Connects through the HTTP bridge.
#[derive(Debug, Default, Clone)]
pub struct BridgeConnector;

#[async_trait]
impl MessagingConnector for BridgeConnector {
    async fn connect(
        &self,
        config: &ZaloPersonalConfig,
    ) -> Result<Arc<dyn MessagingConnection>, ResourceInitError> {
        if config.phone.trim().is_empty() {
            return Err(ResourceInitError::MissingCredential(
                "zalo_config.personal.phone is not set".to_string(),
            ));
        }
        if config.cookies.is_empty() && config.password.is_empty() {
            return Err(ResourceInitError::MissingCredential(
                "zalo_config.personal needs cookies or a password".to_string(),
            ));
        }

        let poll_timeout = Duration::from_secs(config.poll_timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            // Long-poll requests outlive the bridge's own timeout a little.
            .timeout(poll_timeout + Duration::from_secs(10))
            .build()
            .map_err(|e| ResourceInitError::Other(format!("HTTP client setup failed: {e}")))?;

        let base_url = config.bridge_url.trim_end_matches('/').to_string();
        info!(
            bridge = %base_url,
            phone = %redact(&config.phone),
            "Opening personal-account session"
        );

        let resp = client
            .post(format!("{base_url}/session"))
            .json(&SessionRequest {
                phone: &config.phone,
                imei: &config.imei,
                password: &config.password,
                cookies: &config.cookies,
            })
            .send()
            .await
            .map_err(|e| ResourceInitError::Handshake(format!("bridge unreachable: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ResourceInitError::Handshake(format!(
                "bridge rejected login ({status}): {body}"
            )));
        }

        let session: SessionResponse = resp
            .json()
            .await
            .map_err(|e| ResourceInitError::Handshake(format!("malformed session reply: {e}")))?;

        info!(account = %session.account, "Personal-account session established");
        Ok(Arc::new(BridgeConnection {
            client,
            base_url,
            session_id: session.session_id,
            account: session.account,
            poll_timeout_secs: config.poll_timeout_secs,
        }))
    }
}

/// Session held open by the bridge.
pub struct BridgeConnection {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
    account: String,
    poll_timeout_secs: u64,
}

impl BridgeConnection {
    fn session_url(&self, suffix: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.session_id, suffix)
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("bridge {what} returned {status}: {body}");
        }
        Ok(resp)
    }
}

#[async_trait]
impl MessagingConnection for BridgeConnection {
    fn account_id(&self) -> &str {
        &self.account
    }

    async fn receive(&self) -> Result<Vec<InboundMessage>> {
        let resp = self
            .client
            .get(self.session_url("/updates"))
            .query(&[("timeout", self.poll_timeout_secs)])
            .send()
            .await
            .context("bridge poll failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("bridge poll returned {status}");
        }
        let updates: UpdatesResponse = resp.json().await.context("malformed bridge updates")?;
        Ok(updates.messages)
    }

    async fn send_text(&self, thread_id: &str, text: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.session_url("/messages"))
            .json(&serde_json::json!({ "thread_id": thread_id, "text": text }))
            .send()
            .await
            .context("bridge send failed")?;

        Self::check(resp, "send").await?;
        Ok(())
    }

    async fn fetch_threads(&self) -> Result<Vec<ThreadSummary>> {
        let resp = self
            .client
            .get(self.session_url("/threads"))
            .send()
            .await
            .context("bridge thread listing failed")?;
        let threads: ThreadsResponse = Self::check(resp, "thread listing")
            .await?
            .json()
            .await
            .context("malformed bridge thread list")?;
        Ok(threads.threads)
    }

    async fn fetch_messages(&self, thread_id: &str, limit: u32) -> Result<Vec<InboundMessage>> {
        let resp = self
            .client
            .get(self.session_url(&format!("/threads/{thread_id}/messages")))
            .query(&[("limit", limit)])
            .send()
            .await
            .context("bridge history request failed")?;
        let history: UpdatesResponse = Self::check(resp, "history")
            .await?
            .json()
            .await
            .context("malformed bridge history")?;
        Ok(history.messages)
    }

    async fn mark_read(&self, receipt: &ReadReceipt) -> Result<()> {
        let resp = self
            .client
            .post(self.session_url("/read"))
            .json(receipt)
            .send()
            .await
            .context("bridge read receipt failed")?;
        Self::check(resp, "read receipt").await?;
        Ok(())
    }

    async fn close(&self) {
        match self.client.delete(self.session_url("")).send().await {
            Ok(_) => debug!(session = %self.session_id, "Bridge session closed"),
            Err(e) => debug!(error = %e, "Bridge session close failed"),
        }
    }
}
