//! Zigbee radio onboarding.
//!
//! Everything needed to take a coordinator from a plugged-in serial stick to
//! a configured network:
//! - Radio driver contract and probing
//! - Network backups and the radio manager
//! - The Zigbee config flow (port pick, probe, formation strategy)
//! - Migration of a network onto a different radio

pub mod backup;
pub mod config_flow;
pub mod migration;
pub mod radio;
pub mod radio_manager;

/// Integration domain for Zigbee config entries and flows.
pub const DOMAIN: &str = "zigbee";

pub use backup::{Eui64, NetworkBackup, NetworkInfo, NetworkKey, NodeInfo};
pub use config_flow::{PortOption, ZigbeeFlowHandler};
pub use migration::{
    DiscoverySource, MigrationData, MigrationError, MigrationHelper, BACKUP_RETRIES,
};
pub use radio::{ProbeOutcome, RadioApp, RadioController, RadioError, RadioType};
pub use radio_manager::{RadioManager, CONNECT_DELAY, RETRY_DELAY};
