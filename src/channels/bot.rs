use super::bridge::{
    InboundMessage, MessagingConnection, MessagingConnector, ReadReceipt, ThreadSummary,
};
use crate::config::{
    Settings, SettingsStore, DEFAULT_RECONNECT_FACTOR, DEFAULT_RECONNECT_INITIAL_MS,
    DEFAULT_RECONNECT_MAX_MS, INBOUND_CHANNEL_CAPACITY, LISTENER_JOIN_TIMEOUT_MS,
};
use crate::error::ResourceInitError;
use crate::lifecycle::{LifecycleController, LifecycleState, LifecycleStatus, SessionDriver};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// Reconnect Backoff
// ============================================================================

/// Delay schedule for retrying a failed poll.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectBackoff {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_RECONNECT_INITIAL_MS,
            max_delay_ms: DEFAULT_RECONNECT_MAX_MS,
            multiplier: DEFAULT_RECONNECT_FACTOR,
        }
    }
}

impl ReconnectBackoff {
    /// Delay before retry number `attempt` (0-based), capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(30) as i32;
        let delay_ms = (self.initial_delay_ms as f64 * self.multiplier.powi(exponent)) as u64;
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Shared last-activity timestamp.
#[derive(Debug, Default)]
pub struct ActivityTracker(RwLock<Option<DateTime<Utc>>>);

impl ActivityTracker {
    pub fn touch(&self) {
        *self.0.write() = Some(Utc::now());
    }

    pub fn last(&self) -> Option<DateTime<Utc>> {
        *self.0.read()
    }
}

// ============================================================================
// Bot Resource
// ============================================================================

struct Listener {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A live connection plus, while listening, its single listener task.
pub struct BotResource {
    connection: Arc<dyn MessagingConnection>,
    inbound: mpsc::Sender<InboundMessage>,
    activity: Arc<ActivityTracker>,
    backoff: ReconnectBackoff,
    listener: Mutex<Option<Listener>>,
    connected: AtomicBool,
}

impl BotResource {
    /// Handshake only; nothing is spawned.
    pub async fn connect(
        connector: &dyn MessagingConnector,
        settings: &Settings,
        inbound: mpsc::Sender<InboundMessage>,
        activity: Arc<ActivityTracker>,
        backoff: ReconnectBackoff,
    ) -> Result<Self, ResourceInitError> {
        let connection = connector.connect(&settings.zalo_config.personal).await?;
        activity.touch();
        Ok(Self {
            connection,
            inbound,
            activity,
            backoff,
            listener: Mutex::new(None),
            connected: AtomicBool::new(true),
        })
    }

    pub fn connection(&self) -> &Arc<dyn MessagingConnection> {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .map(|l| !l.handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the listener. Returns `false` when one is already running.
    pub fn start_listening(&self) -> bool {
        let mut slot = self.listener.lock();
        if let Some(existing) = slot.as_ref() {
            if !existing.handle.is_finished() {
                return false;
            }
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(listen(
            self.connection.clone(),
            self.inbound.clone(),
            self.activity.clone(),
            self.backoff,
            cancel.clone(),
        ));
        *slot = Some(Listener { cancel, handle });
        info!(account = %self.connection.account_id(), "Listener started");
        true
    }

    /// Cancel the listener and wait a bounded time for it to finish.
    pub async fn stop_listening(&self) {
        let taken = self.listener.lock().take();
        let Some(listener) = taken else {
            return;
        };
        listener.cancel.cancel();

        let mut handle = listener.handle;
        let timeout = Duration::from_millis(LISTENER_JOIN_TIMEOUT_MS);
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => debug!("Listener stopped"),
            Err(_) => {
                handle.abort();
                warn!(
                    timeout_ms = LISTENER_JOIN_TIMEOUT_MS,
                    "Listener did not stop in time; aborted, worker may be orphaned"
                );
            }
        }
    }

    async fn shutdown(&self) {
        self.stop_listening().await;
        self.connection.close().await;
        self.connected.store(false, Ordering::SeqCst);
    }
}

async fn listen(
    connection: Arc<dyn MessagingConnection>,
    inbound: mpsc::Sender<InboundMessage>,
    activity: Arc<ActivityTracker>,
    backoff: ReconnectBackoff,
    cancel: CancellationToken,
) {
    let account = connection.account_id().to_string();
    let mut failures: u32 = 0;

    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            batch = connection.receive() => batch,
        };

        match batch {
            Ok(messages) => {
                failures = 0;
                for message in messages {
                    if message.is_from_self(&account) {
                        continue;
                    }
                    activity.touch();
                    let forwarded = tokio::select! {
                        _ = cancel.cancelled() => return,
                        sent = inbound.send(message) => sent,
                    };
                    if forwarded.is_err() {
                        debug!("Inbound channel closed, listener exiting");
                        return;
                    }
                }
            }
            Err(e) => {
                let delay = backoff.delay(failures);
                failures = failures.saturating_add(1);
                warn!(error = %e, attempt = failures, delay_ms = delay.as_millis() as u64, "Poll failed, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    debug!("Listener cancelled");
}

// ============================================================================
// Driver + Session
// ============================================================================

pub struct BotDriver {
    connector: Arc<dyn MessagingConnector>,
    inbound: mpsc::Sender<InboundMessage>,
    activity: Arc<ActivityTracker>,
    backoff: ReconnectBackoff,
}

#[async_trait]
impl SessionDriver for BotDriver {
    type Resource = BotResource;

    fn name(&self) -> &'static str {
        "bot"
    }

    fn is_enabled(&self, settings: &Settings) -> bool {
        settings.zalo_config.personal.enabled
    }

    fn enabled_patch(&self, enabled: bool) -> serde_json::Value {
        serde_json::json!({ "zalo_config": { "personal": { "enabled": enabled } } })
    }

    async fn acquire(&self, settings: &Settings) -> Result<Arc<BotResource>, ResourceInitError> {
        let resource = BotResource::connect(
            self.connector.as_ref(),
            settings,
            self.inbound.clone(),
            self.activity.clone(),
            self.backoff,
        )
        .await?;
        let resource = Arc::new(resource);
        resource.start_listening();
        Ok(resource)
    }

    async fn release(&self, resource: Arc<BotResource>) {
        resource.shutdown().await;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    #[serde(flatten)]
    pub lifecycle: LifecycleStatus,
    pub connected: bool,
    pub listening: bool,
    pub last_activity: Option<DateTime<Utc>>,
    pub account: Option<String>,
}

/// Personal-account bot session.
pub struct BotSession {
    controller: LifecycleController<BotDriver>,
    activity: Arc<ActivityTracker>,
}

impl BotSession {
    /// Build the session and the receiving end of its inbound message queue.
    pub fn new(
        store: Arc<SettingsStore>,
        connector: Arc<dyn MessagingConnector>,
    ) -> (Self, mpsc::Receiver<InboundMessage>) {
        Self::with_backoff(store, connector, ReconnectBackoff::default())
    }

    pub fn with_backoff(
        store: Arc<SettingsStore>,
        connector: Arc<dyn MessagingConnector>,
        backoff: ReconnectBackoff,
    ) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let activity = Arc::new(ActivityTracker::default());
        let driver = BotDriver {
            connector,
            inbound: tx,
            activity: activity.clone(),
            backoff,
        };
        let session = Self {
            controller: LifecycleController::new(driver, store),
            activity,
        };
        (session, rx)
    }

    pub fn controller(&self) -> &LifecycleController<BotDriver> {
        &self.controller
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

    /// Restart the listener on a connected session.
    pub fn start_listening(&self) -> Result<bool> {
        match self.controller.ready_resource() {
            Some(resource) => Ok(resource.start_listening()),
            None => anyhow::bail!("bot is not connected"),
        }
    }

    /// Stop the listener but keep the connection open.
    pub async fn stop_listening(&self) {
        if let Some(resource) = self.controller.resource() {
            resource.stop_listening().await;
        }
    }

    pub async fn send_message(&self, thread_id: &str, text: &str) -> Result<()> {
        let Some(resource) = self.controller.ready_resource() else {
            anyhow::bail!("bot is not connected");
        };
        resource.connection().send_text(thread_id, text).await?;
        self.activity.touch();
        Ok(())
    }

    fn connected_resource(&self) -> Result<Arc<BotResource>> {
        self.controller
            .ready_resource()
            .ok_or_else(|| anyhow::anyhow!("bot is not connected"))
    }

    pub async fn fetch_threads(&self) -> Result<Vec<ThreadSummary>> {
        self.connected_resource()?.connection().fetch_threads().await
    }

    pub async fn fetch_messages(&self, thread_id: &str, limit: u32) -> Result<Vec<InboundMessage>> {
        self.connected_resource()?
            .connection()
            .fetch_messages(thread_id, limit)
            .await
    }

    pub async fn mark_read(&self, receipt: &ReadReceipt) -> Result<()> {
        self.connected_resource()?.connection().mark_read(receipt).await?;
        self.activity.touch();
        Ok(())
    }

    pub fn status(&self) -> BotStatus {
        let lifecycle = self.controller.status();
        let resource = match lifecycle.state {
            LifecycleState::Disabled => None,
            _ => self.controller.resource(),
        };
        BotStatus {
            connected: resource.as_ref().map(|r| r.is_connected()).unwrap_or(false),
            listening: resource.as_ref().map(|r| r.is_listening()).unwrap_or(false),
            account: resource.map(|r| r.connection().account_id().to_string()),
            last_activity: self.activity.last(),
            lifecycle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZaloPersonalConfig;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Serves scripted batches, then parks forever.
    struct FakeConnection {
        batches: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<InboundMessage>>>,
        sent: Mutex<Vec<(String, String)>>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessagingConnection for FakeConnection {
        fn account_id(&self) -> &str {
            "42"
        }

        async fn receive(&self) -> Result<Vec<InboundMessage>> {
            match self.batches.lock().await.recv().await {
                Some(batch) => Ok(batch),
                None => std::future::pending().await,
            }
        }

        async fn send_text(&self, thread_id: &str, text: &str) -> Result<()> {
            self.sent.lock().push((thread_id.to_string(), text.to_string()));
            Ok(())
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeConnector {
        feed: Mutex<Option<mpsc::UnboundedReceiver<Vec<InboundMessage>>>>,
        connects: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessagingConnector for FakeConnector {
        async fn connect(
            &self,
            _config: &ZaloPersonalConfig,
        ) -> Result<Arc<dyn MessagingConnection>, ResourceInitError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let batches = match self.feed.lock().take() {
                Some(rx) => rx,
                None => mpsc::unbounded_channel().1,
            };
            Ok(Arc::new(FakeConnection {
                batches: tokio::sync::Mutex::new(batches),
                sent: Mutex::new(Vec::new()),
                closed: self.closed.clone(),
            }))
        }
    }

    fn message(from: &str, content: &str) -> InboundMessage {
        serde_json::from_value(json!({
            "msgId": "m", "threadId": "t1", "uidFrom": from, "content": content
        }))
        .unwrap()
    }

    fn session(
        dir: &TempDir,
    ) -> (
        BotSession,
        mpsc::Receiver<InboundMessage>,
        mpsc::UnboundedSender<Vec<InboundMessage>>,
        Arc<FakeConnector>,
    ) {
        let store = Arc::new(SettingsStore::with_settings(
            dir.path().join("app_config.json"),
            Settings::default(),
        ));
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(FakeConnector {
            feed: Mutex::new(Some(feed_rx)),
            connects: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        });
        let (bot, rx) = BotSession::new(store, connector.clone());
        (bot, rx, feed_tx, connector)
    }

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = ReconnectBackoff::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(1000));
        assert_eq!(backoff.delay(1), Duration::from_millis(2000));
        assert_eq!(backoff.delay(20), Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn enable_connects_and_listens() {
        let dir = TempDir::new().unwrap();
        let (bot, mut rx, feed, connector) = session(&dir);

        bot.enable().await.unwrap();
        let status = bot.status();
        assert!(status.connected);
        assert!(status.listening);
        assert_eq!(status.account.as_deref(), Some("42"));

        feed.send(vec![message("0", "mine"), message("7", "hello")]).unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.content, "hello");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_listening_twice_keeps_one_listener() {
        let dir = TempDir::new().unwrap();
        let (bot, _rx, _feed, _) = session(&dir);
        bot.enable().await.unwrap();

        assert!(!bot.start_listening().unwrap());
        assert!(!bot.start_listening().unwrap());
        assert!(bot.status().listening);
    }

    #[tokio::test]
    async fn stop_listening_keeps_connection() {
        let dir = TempDir::new().unwrap();
        let (bot, _rx, _feed, _) = session(&dir);
        bot.enable().await.unwrap();

        bot.stop_listening().await;
        let status = bot.status();
        assert!(status.connected);
        assert!(!status.listening);

        assert!(bot.start_listening().unwrap());
        assert!(bot.status().listening);
    }

    #[tokio::test]
    async fn disable_clears_every_flag() {
        let dir = TempDir::new().unwrap();
        let (bot, _rx, _feed, connector) = session(&dir);
        bot.enable().await.unwrap();
        bot.disable().await;

        let status = bot.status();
        assert_eq!(status.lifecycle.state, LifecycleState::Disabled);
        assert!(!status.lifecycle.enabled);
        assert!(!status.connected);
        assert!(!status.listening);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);
        assert!(bot.start_listening().is_err());
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let dir = TempDir::new().unwrap();
        let (bot, _rx, _feed, _) = session(&dir);
        assert!(bot.send_message("t1", "hi").await.is_err());

        bot.enable().await.unwrap();
        bot.send_message("t1", "hi").await.unwrap();
        assert!(bot.status().last_activity.is_some());
    }

    #[tokio::test]
    async fn history_calls_require_connection() {
        let dir = TempDir::new().unwrap();
        let (bot, _rx, _feed, _) = session(&dir);
        let err = bot.fetch_threads().await.unwrap_err();
        assert!(err.to_string().contains("not connected"));

        bot.enable().await.unwrap();
        let err = bot.fetch_messages("t1", 10).await.unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }
}
