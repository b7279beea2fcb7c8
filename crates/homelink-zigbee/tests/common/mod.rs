//! Shared mock radio for the integration tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Map;

use homelink_core::PortConfig;
use homelink_zigbee::{
    Eui64, NetworkBackup, NetworkInfo, NetworkKey, NodeInfo, ProbeOutcome, RadioApp,
    RadioController, RadioError, RadioType,
};

/// A backup fixture with a deterministic timestamp derived from the counter.
pub fn sample_backup(tx_counter: u64) -> NetworkBackup {
    NetworkBackup {
        backup_time: Utc
            .with_ymd_and_hms(2024, 1, 1, 12, 0, (tx_counter % 60) as u32)
            .single()
            .unwrap(),
        node_info: NodeInfo {
            ieee: Eui64([0, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]),
            nwk: 0x0000,
            model: None,
        },
        network_info: NetworkInfo {
            extended_pan_id: Eui64([0xAA; 8]),
            pan_id: 0x1A62,
            channel: 15,
            nwk_update_id: 0,
            security_level: 5,
            network_key: NetworkKey {
                key: vec![1; 16],
                tx_counter,
                rx_counter: 0,
                seq: 0,
            },
            stack_specific: Map::new(),
            metadata: Map::new(),
        },
    }
}

/// In-memory radio that acts as both the controller and the opened app.
#[derive(Default)]
pub struct MockRadio {
    /// Which driver the fake stick answers probes for; `None` answers none.
    pub answers_to: Mutex<Option<RadioType>>,
    /// Current network state on the stick.
    pub network: Mutex<Option<NetworkBackup>>,
    /// Backups the stick reports.
    pub stored_backups: Mutex<Vec<NetworkBackup>>,
    pub connect_fails: AtomicBool,
    pub connects: AtomicUsize,
    pub forms: AtomicUsize,
    pub restores: AtomicUsize,
}

impl MockRadio {
    pub fn answering(radio_type: RadioType) -> Arc<Self> {
        let radio = Arc::new(Self::default());
        *radio.answers_to.lock().unwrap() = Some(radio_type);
        radio
    }

    pub fn deaf() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Newtype so the foreign [`RadioController`] trait can be implemented for
/// the shared `Arc<MockRadio>` without hitting the orphan rule.
pub struct MockController(pub Arc<MockRadio>);

#[async_trait]
impl RadioController for MockController {
    async fn probe(
        &self,
        radio_type: RadioType,
        _port: &PortConfig,
    ) -> Result<ProbeOutcome, RadioError> {
        if *self.0.answers_to.lock().unwrap() == Some(radio_type) {
            Ok(ProbeOutcome::Match)
        } else {
            Ok(ProbeOutcome::NoMatch)
        }
    }

    async fn connect(
        &self,
        _radio_type: RadioType,
        _port: &PortConfig,
    ) -> Result<Arc<dyn RadioApp>, RadioError> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        if self.0.connect_fails.load(Ordering::SeqCst) {
            return Err(RadioError::Io("serial port gone".to_string()));
        }
        Ok(self.0.clone())
    }
}

#[async_trait]
impl RadioApp for MockRadio {
    async fn load_network_state(&self) -> Result<NetworkBackup, RadioError> {
        self.network
            .lock()
            .unwrap()
            .clone()
            .ok_or(RadioError::NetworkNotFormed)
    }

    async fn backups(&self) -> Result<Vec<NetworkBackup>, RadioError> {
        Ok(self.stored_backups.lock().unwrap().clone())
    }

    async fn create_backup(&self) -> Result<NetworkBackup, RadioError> {
        let backup = self.load_network_state().await?;
        self.stored_backups.lock().unwrap().insert(0, backup.clone());
        Ok(backup)
    }

    async fn restore_backup(
        &self,
        backup: &NetworkBackup,
        _overwrite_ieee: bool,
    ) -> Result<(), RadioError> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        *self.network.lock().unwrap() = Some(backup.clone());
        Ok(())
    }

    async fn form_network(&self) -> Result<(), RadioError> {
        self.forms.fetch_add(1, Ordering::SeqCst);
        *self.network.lock().unwrap() = Some(sample_backup(0));
        Ok(())
    }

    async fn reset_network_info(&self) -> Result<(), RadioError> {
        *self.network.lock().unwrap() = None;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), RadioError> {
        Ok(())
    }
}
