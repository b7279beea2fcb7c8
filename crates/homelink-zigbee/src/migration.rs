//! Radio migration.
//!
//! Moves a configured Zigbee network from one radio to another (typically
//! onto the multiprotocol add-on's network socket): back up the old radio,
//! rewrite the config entry to the new port, then restore the backup onto
//! the new radio once it is reachable.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use homelink_core::{
    ConfigEntryError, ConfigEntryState, ConfigEntryStore, HardwareServiceInfo, PortConfig,
    UsbServiceInfo,
};

use crate::backup::NetworkBackup;
use crate::radio::{RadioError, RadioType};
use crate::radio_manager::{RadioManager, RETRY_DELAY};
use crate::DOMAIN;

/// Attempts for each retried migration operation. No backoff; the fixed
/// [`RETRY_DELAY`] paces the loop.
pub const BACKUP_RETRIES: usize = 100;

/// Where the radio being migrated away from was discovered.
#[derive(Debug, Clone)]
pub enum DiscoverySource {
    Usb(UsbServiceInfo),
    Hardware(HardwareServiceInfo),
}

/// Everything a hardware integration knows about a radio move.
#[derive(Debug, Clone)]
pub struct MigrationData {
    /// The radio the entry is currently configured for.
    pub old_discovery_info: DiscoverySource,
    /// The radio the network moves to.
    pub new_discovery_info: HardwareServiceInfo,
}

/// Migration errors.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Config entry error: {0}")]
    Entry(#[from] ConfigEntryError),

    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    #[error("Migration error: {0}")]
    Invalid(String),
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Drives one radio migration from initiation to finish.
pub struct MigrationHelper {
    store: Arc<ConfigEntryStore>,
    radio_manager: RadioManager,
    entry_id: Option<String>,
    backup: Option<NetworkBackup>,
    new_discovery_info: Option<HardwareServiceInfo>,
}

impl MigrationHelper {
    pub fn new(store: Arc<ConfigEntryStore>, radio_manager: RadioManager) -> Self {
        Self {
            store,
            radio_manager,
            entry_id: None,
            backup: None,
            new_discovery_info: None,
        }
    }

    /// Check whether the configured entry uses the old radio and, if so,
    /// back it up and rewrite the entry to the new radio.
    ///
    /// Returns `Ok(false)` without touching anything when the entry is for
    /// a different device. The entry unload and the backup are each retried
    /// up to [`BACKUP_RETRIES`] times; the entry may still be setting up
    /// when the migration starts.
    pub async fn async_initiate_migration(&mut self, data: MigrationData) -> Result<bool> {
        let entries = self.store.async_entries(DOMAIN).await;
        let Some(entry) = entries.into_iter().next() else {
            debug!("no entry configured, nothing to migrate");
            return Ok(false);
        };

        let entry_path = entry.data["device"]["path"].as_str().unwrap_or_default();
        let matches = match &data.old_discovery_info {
            DiscoverySource::Usb(usb) => {
                entry.unique_id.as_deref() == Some(&usb.unique_id()) || entry_path == usb.device
            }
            DiscoverySource::Hardware(hw) => entry_path == hw.port.path,
        };
        if !matches {
            debug!(entry_path = %entry_path, "entry is for a different radio, not migrating");
            return Ok(false);
        }

        info!(entry_id = %entry.entry_id, "migrating radio to {}", data.new_discovery_info.name);

        if entry.state == ConfigEntryState::Loaded || entry.state == ConfigEntryState::SetupInProgress
        {
            self.unload_with_retries(&entry.entry_id).await?;
        }

        // Point the radio manager at the old radio to take the backup.
        let old_port: PortConfig = serde_json::from_value(entry.data["device"].clone())
            .map_err(|e| MigrationError::Invalid(format!("entry has no usable port: {e}")))?;
        let old_radio_type = entry.data["radio_type"]
            .as_str()
            .and_then(RadioType::from_name)
            .ok_or_else(|| MigrationError::Invalid("entry has no radio type".to_string()))?;
        self.radio_manager.device_settings = Some(old_port);
        self.radio_manager.radio_type = Some(old_radio_type);

        let backup = self.backup_with_retries().await?;

        let new = data.new_discovery_info.clone();
        self.store
            .async_update(&entry.entry_id, |e| {
                e.title = new.name.clone();
                e.data["radio_type"] = json!(new.radio_type);
                e.data["device"] = serde_json::to_value(&new.port)
                    .unwrap_or_else(|_| json!({"path": new.port.path}));
            })
            .await?;

        self.entry_id = Some(entry.entry_id);
        self.backup = Some(backup);
        self.new_discovery_info = Some(data.new_discovery_info);
        Ok(true)
    }

    /// Restore the held backup onto the new radio and reload the entry.
    ///
    /// Retried like initiation; running out of retries is fatal and the
    /// error is re-raised, the entry is left unloaded.
    pub async fn async_finish_migration(&mut self) -> Result<()> {
        let entry_id = self
            .entry_id
            .clone()
            .ok_or_else(|| MigrationError::Invalid("migration was not initiated".to_string()))?;
        let new = self
            .new_discovery_info
            .clone()
            .ok_or_else(|| MigrationError::Invalid("migration was not initiated".to_string()))?;
        let backup = self
            .backup
            .clone()
            .ok_or_else(|| MigrationError::Invalid("no backup to restore".to_string()))?;

        self.radio_manager.device_settings = Some(new.port.clone());
        self.radio_manager.radio_type = RadioType::from_name(&new.radio_type);
        // Different physical radio now; what we read from the old one no
        // longer describes it.
        self.radio_manager.current_settings = None;

        for attempt in 1..=BACKUP_RETRIES {
            match self.radio_manager.async_restore_backup(&backup, true).await {
                Ok(()) => break,
                Err(err) if attempt == BACKUP_RETRIES => {
                    warn!(error = %err, "radio restore failed, out of retries");
                    return Err(err.into());
                }
                Err(err) => {
                    debug!(attempt, error = %err, "radio restore failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }

        self.store.async_reload(&entry_id).await?;
        info!(entry_id = %entry_id, "radio migration finished");
        Ok(())
    }

    async fn unload_with_retries(&self, entry_id: &str) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.async_unload(entry_id).await {
                Ok(()) => return Ok(()),
                Err(ConfigEntryError::OperationNotAllowed(_)) if attempt < BACKUP_RETRIES => {
                    debug!(attempt, entry_id = %entry_id, "entry still setting up, retrying unload");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn backup_with_retries(&mut self) -> Result<NetworkBackup> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.radio_manager.async_create_backup().await {
                Ok(backup) => return Ok(backup),
                Err(err) if attempt < BACKUP_RETRIES => {
                    debug!(attempt, error = %err, "radio backup failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(err) => {
                    warn!(error = %err, "radio backup failed, out of retries");
                    return Err(err.into());
                }
            }
        }
    }
}
