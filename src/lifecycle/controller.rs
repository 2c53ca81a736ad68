use super::{LifecycleState, LifecycleStatus};
use crate::config::{Settings, SettingsStore};
use crate::error::{ConfigError, ResourceInitError};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Session-specific half of a [`LifecycleController`].
///
/// `acquire` must release anything it allocated before returning an error.
#[async_trait]
pub trait SessionDriver: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    /// Whether the settings tree asks for this session to run.
    fn is_enabled(&self, settings: &Settings) -> bool;

    /// Merge-patch that persists the enabled flag.
    fn enabled_patch(&self, enabled: bool) -> serde_json::Value;

    async fn acquire(&self, settings: &Settings) -> Result<Arc<Self::Resource>, ResourceInitError>;

    async fn release(&self, resource: Arc<Self::Resource>);
}

struct StatusCell {
    state: LifecycleState,
    enabled: bool,
    last_error: Option<String>,
    last_transition_at: Option<DateTime<Utc>>,
}

/// Drives one long-lived resource through enable/disable/reload.
///
/// Transitions serialize behind an async mutex. The bound resource sits in an
/// atomic cell so readers see either the old or the new one, never a mix.
pub struct LifecycleController<D: SessionDriver> {
    driver: D,
    store: Arc<SettingsStore>,
    transition: Mutex<()>,
    resource: ArcSwapOption<D::Resource>,
    status: RwLock<StatusCell>,
}

impl<D: SessionDriver> LifecycleController<D> {
    pub fn new(driver: D, store: Arc<SettingsStore>) -> Self {
        let enabled = driver.is_enabled(&store.snapshot());
        let state = if enabled {
            LifecycleState::Initializing
        } else {
            LifecycleState::Disabled
        };
        Self {
            driver,
            store,
            transition: Mutex::new(()),
            resource: ArcSwapOption::empty(),
            status: RwLock::new(StatusCell {
                state,
                enabled,
                last_error: None,
                last_transition_at: None,
            }),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn store(&self) -> &Arc<SettingsStore> {
        &self.store
    }

    pub fn state(&self) -> LifecycleState {
        self.status.read().state
    }

    /// The controller's own enabled flag.
    pub fn is_enabled(&self) -> bool {
        self.status.read().enabled
    }

    /// Currently bound resource, if any.
    pub fn resource(&self) -> Option<Arc<D::Resource>> {
        self.resource.load_full()
    }

    /// Bound resource, only while Ready.
    pub fn ready_resource(&self) -> Option<Arc<D::Resource>> {
        if self.state() == LifecycleState::Ready {
            self.resource()
        } else {
            None
        }
    }

    /// Run `f` against the Ready resource under the transition lock, so no
    /// enable, disable or reload interleaves with it.
    pub async fn with_ready<T>(&self, f: impl FnOnce(&D::Resource) -> T) -> Option<T> {
        let _guard = self.transition.lock().await;
        self.ready_resource().map(|resource| f(&resource))
    }

    pub fn status(&self) -> LifecycleStatus {
        let cell = self.status.read();
        LifecycleStatus {
            session: self.driver.name(),
            state: cell.state,
            enabled: cell.enabled,
            last_error: cell.last_error.clone(),
            last_transition_at: cell.last_transition_at,
        }
    }

    fn set_state(&self, state: LifecycleState) {
        let mut cell = self.status.write();
        if cell.state != state {
            debug!(session = self.driver.name(), from = %cell.state, to = %state, "Lifecycle transition");
        }
        cell.state = state;
        cell.last_transition_at = Some(Utc::now());
    }

    fn set_enabled(&self, enabled: bool) {
        self.status.write().enabled = enabled;
    }

    /// Bring the session up at boot when settings ask for it.
    pub async fn start(&self) {
        if !self.is_enabled() {
            return;
        }
        if let Err(e) = self.enable().await {
            warn!(session = self.driver.name(), error = %e, "Session failed to start");
        }
    }

    /// Acquire the resource and go Ready. Returns the existing resource when
    /// already Ready.
    pub async fn enable(&self) -> Result<Arc<D::Resource>, ResourceInitError> {
        let _guard = self.transition.lock().await;
        self.enable_locked().await
    }

    /// Release the resource and go Disabled. A no-op on a session that was
    /// never brought up.
    pub async fn disable(&self) {
        let _guard = self.transition.lock().await;
        self.disable_locked().await;
    }

    /// Tear down and rebuild from current settings.
    pub async fn reload(&self) -> Result<Arc<D::Resource>, ResourceInitError> {
        let _guard = self.transition.lock().await;
        info!(session = self.driver.name(), "Reloading session");
        self.release_current().await;
        self.enable_locked().await
    }

    /// React to a new enabled flag from settings: enable or disable, then
    /// persist the flag. Nothing happens if the flag already matches.
    pub async fn handle_config_change(
        &self,
        new_enabled: bool,
    ) -> Result<LifecycleStatus, ConfigError> {
        {
            let _guard = self.transition.lock().await;
            if new_enabled == self.is_enabled() {
                return Ok(self.status());
            }
            info!(session = self.driver.name(), enabled = new_enabled, "Enabled flag changed");
            if new_enabled {
                if let Err(e) = self.enable_locked().await {
                    warn!(session = self.driver.name(), error = %e, "Enable after config change failed");
                }
            } else {
                self.disable_locked().await;
            }
        }

        self.store
            .update(self.driver.enabled_patch(new_enabled))
            .await?;
        Ok(self.status())
    }

    async fn enable_locked(&self) -> Result<Arc<D::Resource>, ResourceInitError> {
        self.set_enabled(true);
        if let Some(existing) = self.ready_resource() {
            return Ok(existing);
        }

        // A resource left over from an earlier failed reload is stale.
        self.release_current().await;

        self.set_state(LifecycleState::Initializing);
        let settings = self.store.snapshot();
        match self.driver.acquire(&settings).await {
            Ok(resource) => {
                self.resource.store(Some(resource.clone()));
                {
                    let mut cell = self.status.write();
                    cell.last_error = None;
                }
                self.set_state(LifecycleState::Ready);
                info!(session = self.driver.name(), "Session ready");
                Ok(resource)
            }
            Err(e) => {
                self.status.write().last_error = Some(e.to_string());
                self.set_state(LifecycleState::Error);
                warn!(session = self.driver.name(), error = %e, "Session failed to initialize");
                Err(e)
            }
        }
    }

    async fn disable_locked(&self) {
        self.set_enabled(false);
        let state = self.state();
        if state == LifecycleState::Disabled && self.resource().is_none() {
            return;
        }

        self.set_state(LifecycleState::ShuttingDown);
        self.release_current().await;
        self.status.write().last_error = None;
        self.set_state(LifecycleState::Disabled);
        info!(session = self.driver.name(), "Session disabled");
    }

    async fn release_current(&self) {
        if let Some(resource) = self.resource.swap(None) {
            self.set_state(LifecycleState::ShuttingDown);
            self.driver.release(resource).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Debug)]
    struct Handle {
        id: usize,
    }

    #[derive(Default)]
    struct Counters {
        acquired: AtomicUsize,
        released: AtomicUsize,
        partial_released: AtomicUsize,
        fail: AtomicBool,
    }

    struct CountingDriver {
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl SessionDriver for CountingDriver {
        type Resource = Handle;

        fn name(&self) -> &'static str {
            "test"
        }

        fn is_enabled(&self, settings: &Settings) -> bool {
            settings.zalo_config.personal.enabled
        }

        fn enabled_patch(&self, enabled: bool) -> serde_json::Value {
            json!({"zalo_config": {"personal": {"enabled": enabled}}})
        }

        async fn acquire(&self, _settings: &Settings) -> Result<Arc<Handle>, ResourceInitError> {
            if self.counters.fail.load(Ordering::SeqCst) {
                self.counters.partial_released.fetch_add(1, Ordering::SeqCst);
                return Err(ResourceInitError::Handshake("refused".into()));
            }
            let id = self.counters.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Handle { id }))
        }

        async fn release(&self, _resource: Arc<Handle>) {
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn controller(dir: &TempDir) -> (LifecycleController<CountingDriver>, Arc<Counters>) {
        let store = Arc::new(SettingsStore::with_settings(
            dir.path().join("app_config.json"),
            Settings::default(),
        ));
        let counters = Arc::new(Counters::default());
        let driver = CountingDriver {
            counters: counters.clone(),
        };
        (LifecycleController::new(driver, store), counters)
    }

    #[tokio::test]
    async fn starts_disabled_when_config_says_so() {
        let dir = TempDir::new().unwrap();
        let (c, _) = controller(&dir);
        assert_eq!(c.state(), LifecycleState::Disabled);
        assert!(!c.is_enabled());
    }

    #[tokio::test]
    async fn enable_twice_keeps_same_handle() {
        let dir = TempDir::new().unwrap();
        let (c, counters) = controller(&dir);

        let first = c.enable().await.unwrap();
        let second = c.enable().await.unwrap();
        assert_eq!(c.state(), LifecycleState::Ready);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counters.acquired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disable_then_enable_yields_new_handle() {
        let dir = TempDir::new().unwrap();
        let (c, counters) = controller(&dir);

        let first = c.enable().await.unwrap();
        c.disable().await;
        assert_eq!(c.state(), LifecycleState::Disabled);
        assert!(c.resource().is_none());

        let second = c.enable().await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disable_on_fresh_session_is_noop() {
        let dir = TempDir::new().unwrap();
        let (c, counters) = controller(&dir);
        c.disable().await;
        c.disable().await;
        assert_eq!(c.state(), LifecycleState::Disabled);
        assert!(c.status().last_transition_at.is_none());
        assert_eq!(counters.released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_enable_enters_error_and_can_retry() {
        let dir = TempDir::new().unwrap();
        let (c, counters) = controller(&dir);
        counters.fail.store(true, Ordering::SeqCst);

        let err = c.enable().await.unwrap_err();
        assert!(matches!(err, ResourceInitError::Handshake(_)));
        let status = c.status();
        assert_eq!(status.state, LifecycleState::Error);
        assert!(status.last_error.unwrap().contains("refused"));
        assert!(c.resource().is_none());
        assert_eq!(counters.partial_released.load(Ordering::SeqCst), 1);

        counters.fail.store(false, Ordering::SeqCst);
        c.enable().await.unwrap();
        assert_eq!(c.state(), LifecycleState::Ready);
        assert!(c.status().last_error.is_none());
    }

    #[tokio::test]
    async fn reload_swaps_resource() {
        let dir = TempDir::new().unwrap();
        let (c, counters) = controller(&dir);
        let first = c.enable().await.unwrap();
        let second = c.reload().await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        assert_eq!(c.state(), LifecycleState::Ready);
    }

    #[tokio::test]
    async fn with_ready_skips_disabled_session() {
        let dir = TempDir::new().unwrap();
        let (c, _) = controller(&dir);
        assert_eq!(c.with_ready(|h| h.id).await, None);

        let handle = c.enable().await.unwrap();
        assert_eq!(c.with_ready(|h| h.id).await, Some(handle.id));

        c.disable().await;
        assert_eq!(c.with_ready(|h| h.id).await, None);
    }

    #[tokio::test]
    async fn config_change_persists_flag() {
        let dir = TempDir::new().unwrap();
        let (c, counters) = controller(&dir);

        let status = c.handle_config_change(true).await.unwrap();
        assert_eq!(status.state, LifecycleState::Ready);
        assert!(c.store().snapshot().zalo_config.personal.enabled);

        // Same flag again: nothing happens.
        c.handle_config_change(true).await.unwrap();
        assert_eq!(counters.acquired.load(Ordering::SeqCst), 1);

        let status = c.handle_config_change(false).await.unwrap();
        assert_eq!(status.state, LifecycleState::Disabled);
        assert!(!c.store().snapshot().zalo_config.personal.enabled);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_enable_still_persists_desired_flag() {
        let dir = TempDir::new().unwrap();
        let (c, counters) = controller(&dir);
        counters.fail.store(true, Ordering::SeqCst);

        let status = c.handle_config_change(true).await.unwrap();
        assert_eq!(status.state, LifecycleState::Error);
        assert!(status.enabled);
        assert!(c.store().snapshot().zalo_config.personal.enabled);
    }
}
