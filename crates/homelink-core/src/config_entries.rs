//! Config entry store.
//!
//! A config entry is the persisted configuration of one set-up integration
//! (one radio, one bridge, one cloud account). Flows are privileged mutators
//! of entry data and title; entry lifecycle (create/remove/load) belongs to
//! the store.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Setup state of a config entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    /// The entry has not been loaded.
    NotLoaded,
    /// The entry is currently being set up.
    SetupInProgress,
    /// The entry has been set up successfully.
    Loaded,
    /// Setup failed and will be retried.
    SetupRetry,
}

/// Persisted configuration for one set-up integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Unique entry identifier.
    pub entry_id: String,
    /// Integration domain this entry belongs to.
    pub domain: String,
    /// Unique identifier within the domain, if the integration has one.
    pub unique_id: Option<String>,
    /// Human-readable title.
    pub title: String,
    /// Integration configuration data.
    pub data: Value,
    /// User-tunable options.
    pub options: Value,
    /// Current setup state.
    pub state: ConfigEntryState,
}

impl ConfigEntry {
    /// Create a new, not-yet-loaded entry.
    pub fn new(domain: impl Into<String>, title: impl Into<String>, data: Value) -> Self {
        Self {
            entry_id: Uuid::new_v4().simple().to_string(),
            domain: domain.into(),
            unique_id: None,
            title: title.into(),
            data,
            options: Value::Object(Default::default()),
            state: ConfigEntryState::NotLoaded,
        }
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }
}

/// Config entry store errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigEntryError {
    /// The referenced entry does not exist.
    #[error("Unknown config entry: {0}")]
    UnknownEntry(String),

    /// The operation is not allowed in the entry's current state.
    #[error("Operation not allowed: {0}")]
    OperationNotAllowed(String),

    /// An entry with the same unique ID already exists.
    #[error("Entry already configured: {0}")]
    AlreadyConfigured(String),
}

/// In-memory store of config entries with load/unload lifecycle hooks.
///
/// Unloading an entry whose setup is still in progress fails with
/// [`ConfigEntryError::OperationNotAllowed`]; callers that must unload
/// (e.g. a radio migration) retry around that.
#[derive(Default)]
pub struct ConfigEntryStore {
    entries: RwLock<HashMap<String, ConfigEntry>>,
}

impl ConfigEntryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add an entry to the store.
    ///
    /// Fails if another entry in the same domain carries the same unique ID.
    pub async fn async_add(&self, entry: ConfigEntry) -> Result<String, ConfigEntryError> {
        let mut entries = self.entries.write().await;
        if let Some(unique_id) = &entry.unique_id {
            let duplicate = entries
                .values()
                .any(|e| e.domain == entry.domain && e.unique_id.as_deref() == Some(unique_id));
            if duplicate {
                return Err(ConfigEntryError::AlreadyConfigured(unique_id.clone()));
            }
        }
        let entry_id = entry.entry_id.clone();
        debug!(domain = %entry.domain, entry_id = %entry_id, "adding config entry");
        entries.insert(entry_id.clone(), entry);
        Ok(entry_id)
    }

    /// Get a snapshot of an entry.
    pub async fn async_get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.read().await.get(entry_id).cloned()
    }

    /// All entries for a domain.
    pub async fn async_entries(&self, domain: &str) -> Vec<ConfigEntry> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.domain == domain)
            .cloned()
            .collect()
    }

    /// Mutate an entry in place.
    pub async fn async_update<F>(&self, entry_id: &str, f: F) -> Result<(), ConfigEntryError>
    where
        F: FnOnce(&mut ConfigEntry),
    {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntryError::UnknownEntry(entry_id.to_string()))?;
        f(entry);
        Ok(())
    }

    /// Set an entry's state directly.
    pub async fn async_set_state(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
    ) -> Result<(), ConfigEntryError> {
        self.async_update(entry_id, |e| e.state = state).await
    }

    /// Unload an entry.
    ///
    /// Fails with [`ConfigEntryError::OperationNotAllowed`] while the entry's
    /// setup is still in progress.
    pub async fn async_unload(&self, entry_id: &str) -> Result<(), ConfigEntryError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntryError::UnknownEntry(entry_id.to_string()))?;
        match entry.state {
            ConfigEntryState::SetupInProgress => Err(ConfigEntryError::OperationNotAllowed(
                format!("entry {entry_id} is being set up"),
            )),
            _ => {
                entry.state = ConfigEntryState::NotLoaded;
                Ok(())
            }
        }
    }

    /// Reload an entry (unload if loaded, then load).
    pub async fn async_reload(&self, entry_id: &str) -> Result<(), ConfigEntryError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntryError::UnknownEntry(entry_id.to_string()))?;
        if entry.state == ConfigEntryState::SetupInProgress {
            return Err(ConfigEntryError::OperationNotAllowed(format!(
                "entry {entry_id} is being set up"
            )));
        }
        debug!(entry_id = %entry_id, "reloading config entry");
        entry.state = ConfigEntryState::Loaded;
        Ok(())
    }

    /// Remove an entry, returning it if it existed.
    pub async fn async_remove(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.write().await.remove(entry_id)
    }
}
