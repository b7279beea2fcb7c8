//! Radio driver contract.
//!
//! The Zigbee crate never talks to serial hardware directly; it goes through
//! a [`RadioController`] that knows how to probe and open each supported
//! radio driver, and a [`RadioApp`] handle for an opened coordinator.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use homelink_core::PortConfig;

use crate::backup::NetworkBackup;

/// Supported radio driver families, in automatic-probe priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioType {
    Ezsp,
    Znp,
    Deconz,
    Zigate,
    Xbee,
}

impl RadioType {
    /// All radio types, most common first; probes run in this order.
    pub const ALL: [RadioType; 5] = [
        RadioType::Ezsp,
        RadioType::Znp,
        RadioType::Deconz,
        RadioType::Zigate,
        RadioType::Xbee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RadioType::Ezsp => "ezsp",
            RadioType::Znp => "znp",
            RadioType::Deconz => "deconz",
            RadioType::Zigate => "zigate",
            RadioType::Xbee => "xbee",
        }
    }

    /// Name shown in the manual radio picker.
    pub fn description(&self) -> &'static str {
        match self {
            RadioType::Ezsp => "EZSP = Silicon Labs EmberZNet: Elelabs, HUSBZB-1, Sonoff ZBBridge",
            RadioType::Znp => "ZNP = Texas Instruments Z-Stack: CC253x, CC26x2, CC13x2",
            RadioType::Deconz => "deCONZ = dresden elektronik: ConBee I/II, RaspBee I/II",
            RadioType::Zigate => "ZiGate = ZiGate Zigbee radios: PiZiGate, ZiGate USB-TTL",
            RadioType::Xbee => "XBee = Digi XBee Zigbee radios: Digi XBee Series 2, 2C, 3",
        }
    }

    pub fn from_name(name: &str) -> Option<RadioType> {
        RadioType::ALL.iter().copied().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for RadioType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Radio stack errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RadioError {
    /// The coordinator has no formed network.
    #[error("Network is not formed")]
    NetworkNotFormed,

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Radio I/O error: {0}")]
    Io(String),

    #[error("Invalid backup: {0}")]
    InvalidBackup(String),

    #[error("Radio error: {0}")]
    Internal(String),
}

/// Result type for radio operations.
pub type Result<T> = std::result::Result<T, RadioError>;

/// Outcome of probing one driver against a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The driver does not speak to this device.
    NoMatch,
    /// The driver matched with the probed settings.
    Match,
    /// The driver matched, but only with these corrected port settings.
    /// They replace the probed settings wholesale.
    MatchWithSettings(PortConfig),
}

/// Factory for probing and opening radio drivers.
#[async_trait]
pub trait RadioController: Send + Sync {
    /// Try one driver against a port.
    async fn probe(&self, radio_type: RadioType, port: &PortConfig) -> Result<ProbeOutcome>;

    /// Open a coordinator.
    ///
    /// The radio is opened cold: no network is formed and the stack is not
    /// started, so network state can be read and written safely.
    async fn connect(
        &self,
        radio_type: RadioType,
        port: &PortConfig,
    ) -> Result<Arc<dyn RadioApp>>;
}

/// An opened coordinator.
#[async_trait]
pub trait RadioApp: Send + Sync {
    /// Read the formed network's state as an unsaved backup snapshot.
    ///
    /// Fails with [`RadioError::NetworkNotFormed`] on a factory-fresh radio.
    async fn load_network_state(&self) -> Result<NetworkBackup>;

    /// Backups stored on or known to the radio, newest first.
    async fn backups(&self) -> Result<Vec<NetworkBackup>>;

    /// Capture the current network as a new backup.
    async fn create_backup(&self) -> Result<NetworkBackup>;

    /// Write a backup's network state onto the radio.
    async fn restore_backup(&self, backup: &NetworkBackup, overwrite_ieee: bool) -> Result<()>;

    /// Form a brand-new network with generated identity and keys.
    async fn form_network(&self) -> Result<()>;

    /// Wipe the radio's network state.
    async fn reset_network_info(&self) -> Result<()>;

    /// Close the connection.
    async fn shutdown(&self) -> Result<()>;
}
