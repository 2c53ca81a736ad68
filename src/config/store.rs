use super::{
    load_settings_file, merge_patch, resolve_config_snapshot_hash, write_config_file_atomic,
    Settings,
};
use crate::error::ConfigError;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Top-level settings section, used to route change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsSection {
    Agent,
    ZaloOa,
    ZaloPersonal,
}

/// Published after every committed change to the settings tree.
#[derive(Debug, Clone)]
pub struct SettingsChange {
    pub sections: Vec<SettingsSection>,
    pub previous: Arc<Settings>,
    pub current: Arc<Settings>,
}

impl SettingsChange {
    pub fn touches(&self, section: SettingsSection) -> bool {
        self.sections.contains(&section)
    }
}

fn changed_sections(old: &Settings, new: &Settings) -> Vec<SettingsSection> {
    let mut sections = Vec::new();
    if old.agent_config != new.agent_config {
        sections.push(SettingsSection::Agent);
    }
    if old.zalo_config.oa != new.zalo_config.oa {
        sections.push(SettingsSection::ZaloOa);
    }
    if old.zalo_config.personal != new.zalo_config.personal {
        sections.push(SettingsSection::ZaloPersonal);
    }
    sections
}

/// Validated, persisted settings with lock-free reads.
///
/// Writers serialize behind one async mutex; readers load the last committed
/// snapshot without blocking.
pub struct SettingsStore {
    path: PathBuf,
    current: ArcSwap<Settings>,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<SettingsChange>,
}

impl SettingsStore {
    /// Load settings from `path`, falling back to defaults when the file is
    /// missing, unreadable or invalid. Never fails.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut settings = if path.exists() {
            match load_settings_file(&path) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Settings file unusable, using defaults");
                    Settings::default()
                }
            }
        } else {
            info!(path = %path.display(), "No settings file found, using defaults");
            Settings::default()
        };
        settings.apply_env_overrides();
        Self::with_settings(path, settings)
    }

    /// Build a store around an already-validated snapshot.
    pub fn with_settings(path: impl Into<PathBuf>, settings: Settings) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            path: path.into(),
            current: ArcSwap::from_pointee(settings),
            write_lock: Mutex::new(()),
            changes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last committed snapshot.
    pub fn snapshot(&self) -> Arc<Settings> {
        self.current.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.changes.subscribe()
    }

    /// SHA-256 of the canonical JSON form of the current snapshot.
    pub fn settings_hash(&self) -> String {
        let value = serde_json::to_value(&*self.snapshot()).unwrap_or_default();
        resolve_config_snapshot_hash(&value)
    }

    /// Merge-patch the settings tree, re-validate, persist, then publish.
    ///
    /// On any failure the in-memory snapshot and the file on disk are left
    /// exactly as they were.
    pub async fn update(&self, patch: serde_json::Value) -> Result<Arc<Settings>, ConfigError> {
        if !patch.is_object() {
            return Err(ConfigError::InvalidPatch);
        }

        let _guard = self.write_lock.lock().await;
        let previous = self.current.load_full();

        let mut tree = serde_json::to_value(&*previous)?;
        merge_patch(&mut tree, &patch);
        let next = Settings::from_value(tree)?;

        if next == *previous {
            debug!("Settings patch changed nothing");
            return Ok(previous);
        }

        self.persist(&next)?;
        Ok(self.commit(previous, next))
    }

    /// Re-persist the current snapshot.
    pub async fn save(&self) -> Result<(), ConfigError> {
        let _guard = self.write_lock.lock().await;
        let current = self.current.load_full();
        self.persist(&current)
    }

    /// Pick up out-of-band edits to the settings file.
    ///
    /// Returns `true` when a different, valid document was swapped in. An
    /// invalid file leaves the current snapshot in effect.
    pub async fn reload_from_disk(&self) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock().await;
        if !self.path.exists() {
            return Ok(false);
        }

        let mut next = match load_settings_file(&self.path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring invalid settings file on reload");
                return Err(e);
            }
        };
        next.apply_env_overrides();

        let previous = self.current.load_full();
        if next == *previous {
            return Ok(false);
        }
        info!(path = %self.path.display(), "Settings changed on disk");
        self.commit(previous, next);
        Ok(true)
    }

    fn persist(&self, settings: &Settings) -> Result<(), ConfigError> {
        let value = serde_json::to_value(settings)?;
        write_config_file_atomic(&self.path, &value).map_err(|source| ConfigError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn commit(&self, previous: Arc<Settings>, next: Settings) -> Arc<Settings> {
        let current = Arc::new(next);
        self.current.store(current.clone());

        let sections = changed_sections(&previous, &current);
        debug!(?sections, "Settings committed");
        // No subscribers is fine.
        let _ = self.changes.send(SettingsChange {
            sections,
            previous,
            current: current.clone(),
        });
        current
    }
}
