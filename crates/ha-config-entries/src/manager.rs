//! Config entries manager
//!
//! Owns every entry, persists them to `.storage/core.config_entries` and
//! drives setup/unload through the handler registered for the entry's domain.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use ha_storage::{Storable, Storage, StorageError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::state_machine::InvalidTransition;

pub const STORAGE_KEY: &str = "core.config_entries";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Unload failed: {0}")]
    UnloadFailed(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Integration side of the entry lifecycle
///
/// Errors are human readable reasons; they end up in `ConfigEntry::reason`.
#[async_trait]
pub trait EntryHandler: Send + Sync {
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), String>;

    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<(), String>;
}

/// Called with the new entry after its data or options changed
pub type UpdateListener = Arc<dyn Fn(ConfigEntry) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct ConfigEntries {
    storage: Arc<Storage>,

    /// entry_id -> entry
    entries: DashMap<String, ConfigEntry>,

    /// domain -> entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Serializes setup and unload across all entries
    setup_lock: Mutex<()>,

    handlers: DashMap<String, Arc<dyn EntryHandler>>,

    /// entry_id -> listeners, dropped when the entry unloads
    update_listeners: DashMap<String, Vec<UpdateListener>>,
}

impl ConfigEntries {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            setup_lock: Mutex::new(()),
            handlers: DashMap::new(),
            update_listeners: DashMap::new(),
        }
    }

    /// Load persisted entries; all start NotLoaded
    pub async fn load(&self) -> ConfigEntriesResult<()> {
        if let Some(data) = self.storage.load::<ConfigEntriesData>().await? {
            info!(count = data.entries.len(), "Loading config entries");
            for entry in data.entries {
                self.index_entry(&entry);
            }
        }
        Ok(())
    }

    async fn save(&self) -> ConfigEntriesResult<()> {
        let mut entries: Vec<ConfigEntry> = self.entries.iter().map(|r| r.value().clone()).collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        self.storage.save(&ConfigEntriesData { entries }).await?;
        debug!(count = self.entries.len(), "Saved config entries");
        Ok(())
    }

    fn index_entry(&self, entry: &ConfigEntry) {
        self.entries.insert(entry.entry_id.clone(), entry.clone());
        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry.entry_id.clone());
        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id.insert(
                (entry.domain.clone(), unique_id.clone()),
                entry.entry_id.clone(),
            );
        }
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }
        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }
        self.entries.remove(&entry.entry_id);
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        let mut entries: Vec<ConfigEntry> = self
            .by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        entries
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        let entry_id = self
            .by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))?
            .clone();
        self.get(&entry_id)
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<ConfigEntry> {
        let mut entries: Vec<ConfigEntry> = self.entries.iter().map(|r| r.value().clone()).collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add and persist an entry; a taken (domain, unique_id) is rejected
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);
        self.save().await?;

        info!(domain = %entry.domain, entry_id = %entry.entry_id, title = %entry.title, "Added config entry");
        Ok(entry)
    }

    /// Apply `update`, persist, then await the entry's update listeners
    ///
    /// Listeners only run when data or options actually changed.
    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let (updated, changed) = {
            let mut entry = self
                .entries
                .get_mut(entry_id)
                .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

            let mut changed = false;
            if let Some(title) = update.title {
                entry.title = title;
            }
            if let Some(data) = update.data {
                changed |= entry.data != data;
                entry.data = data;
            }
            if let Some(options) = update.options {
                changed |= entry.options != options;
                entry.options = options;
            }
            entry.modified_at = Utc::now();
            (entry.clone(), changed)
        };

        self.save().await?;
        debug!(entry_id, changed, "Updated config entry");

        if changed {
            let listeners = self
                .update_listeners
                .get(entry_id)
                .map(|l| l.clone())
                .unwrap_or_default();
            for listener in listeners {
                listener(updated.clone()).await;
            }
        }

        Ok(updated)
    }

    /// Unload if needed, then forget and persist
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if matches!(entry.state, ConfigEntryState::Loaded | ConfigEntryState::SetupError) {
            self.unload(entry_id).await?;
        }

        self.unindex_entry(&entry);
        self.update_listeners.remove(entry_id);
        self.save().await?;

        info!(domain = %entry.domain, entry_id, "Removed config entry");
        Ok(entry)
    }

    fn set_state(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!(entry_id, ?state, "Entry state changed");
        Ok(())
    }

    pub fn register_handler(&self, domain: &str, handler: Arc<dyn EntryHandler>) {
        self.handlers.insert(domain.to_string(), handler);
        debug!(domain, "Registered entry handler");
    }

    pub fn add_update_listener(&self, entry_id: &str, listener: UpdateListener) {
        self.update_listeners
            .entry(entry_id.to_string())
            .or_default()
            .push(listener);
    }

    /// Run the domain's setup for one entry
    ///
    /// Entries without a handler are marked loaded. A failing handler leaves
    /// the entry in SetupError with the reason recorded.
    pub async fn setup(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.disabled {
            debug!(entry_id, "Skipping setup of disabled entry");
            return Ok(());
        }

        self.set_state(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let handler = self.handlers.get(&entry.domain).map(|h| h.clone());
        let Some(handler) = handler else {
            debug!(domain = %entry.domain, "No handler registered, marking loaded");
            return self.set_state(entry_id, ConfigEntryState::Loaded, None);
        };

        match handler.setup_entry(&entry).await {
            Ok(()) => {
                self.set_state(entry_id, ConfigEntryState::Loaded, None)?;
                info!(domain = %entry.domain, entry_id, "Config entry set up");
                Ok(())
            }
            Err(reason) => {
                error!(domain = %entry.domain, entry_id, %reason, "Config entry setup failed");
                self.set_state(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                Err(ConfigEntriesError::SetupFailed(reason))
            }
        }
    }

    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if !entry.state.is_recoverable() {
            return Err(ConfigEntriesError::CannotUnload(entry.state));
        }
        if entry.state == ConfigEntryState::NotLoaded {
            return Ok(());
        }

        self.set_state(entry_id, ConfigEntryState::UnloadInProgress, None)?;
        self.update_listeners.remove(entry_id);

        let handler = self.handlers.get(&entry.domain).map(|h| h.clone());
        let result = match (handler, entry.state) {
            (Some(handler), ConfigEntryState::Loaded) => handler.unload_entry(&entry).await,
            _ => Ok(()),
        };

        match result {
            Ok(()) => {
                self.set_state(entry_id, ConfigEntryState::NotLoaded, None)?;
                info!(domain = %entry.domain, entry_id, "Config entry unloaded");
                Ok(())
            }
            Err(reason) => {
                warn!(domain = %entry.domain, entry_id, %reason, "Config entry unload failed");
                self.set_state(entry_id, ConfigEntryState::FailedUnload, Some(reason.clone()))?;
                Err(ConfigEntriesError::UnloadFailed(reason))
            }
        }
    }

    pub async fn reload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        self.unload(entry_id).await?;
        self.setup(entry_id).await
    }

    /// Set up every entry that is not loaded yet, oldest first
    ///
    /// Entries already loaded (e.g. by a finished config flow) or busy are
    /// skipped. Failures are logged and collected.
    pub async fn setup_all(&self) -> Vec<ConfigEntriesResult<()>> {
        let mut results = Vec::new();
        for entry in self.entries() {
            if !entry.state.can_transition_to(ConfigEntryState::SetupInProgress) {
                debug!(entry_id = %entry.entry_id, state = ?entry.state, "Skipping setup");
                continue;
            }
            results.push(self.setup(&entry.entry_id).await);
        }
        results
    }
}
