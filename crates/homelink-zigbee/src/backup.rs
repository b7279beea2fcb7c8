//! Network backups.
//!
//! A backup captures the coordinator's network identity and key material so
//! the network can be moved to another radio without re-pairing devices.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// IEEE EUI-64 address, rendered as colon-separated hex (`AA:BB:...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Eui64(pub [u8; 8]);

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for byte in self.0 {
            if !first {
                write!(f, ":")?;
            }
            write!(f, "{byte:02X}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Eui64 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 8 {
            return Err(format!("invalid EUI64: {s}"));
        }
        let mut bytes = [0u8; 8];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] =
                u8::from_str_radix(part, 16).map_err(|_| format!("invalid EUI64: {s}"))?;
        }
        Ok(Eui64(bytes))
    }
}

impl Serialize for Eui64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Eui64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Network key with its frame counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkKey {
    /// 128-bit key material.
    pub key: Vec<u8>,
    /// Outgoing frame counter. Strictly increases over the life of the
    /// network; the basis for [`NetworkBackup::supersedes`].
    pub tx_counter: u64,
    #[serde(default)]
    pub rx_counter: u64,
    #[serde(default)]
    pub seq: u8,
}

/// Network identity and security state of a formed network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub extended_pan_id: Eui64,
    pub pan_id: u16,
    pub channel: u8,
    pub nwk_update_id: u8,
    pub security_level: u8,
    pub network_key: NetworkKey,
    /// Driver-specific state carried through restore.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub stack_specific: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// The coordinator's own addressing info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub ieee: Eui64,
    pub nwk: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// One point-in-time capture of a coordinator's network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkBackup {
    pub backup_time: DateTime<Utc>,
    pub node_info: NodeInfo,
    pub network_info: NetworkInfo,
}

impl NetworkBackup {
    /// Whether both backups describe the same network on the same radio.
    pub fn is_compatible_with(&self, other: &NetworkBackup) -> bool {
        self.node_info.ieee == other.node_info.ieee
            && self.network_info.extended_pan_id == other.network_info.extended_pan_id
            && self.network_info.pan_id == other.network_info.pan_id
            && self.network_info.network_key.key == other.network_info.network_key.key
    }

    /// Whether restoring `other` on top of this backup would lose nothing.
    ///
    /// True for the same network when this backup's frame counter is at
    /// least as new; restoring an already-superseded backup is a no-op.
    pub fn supersedes(&self, other: &NetworkBackup) -> bool {
        self.is_compatible_with(other)
            && self.network_info.network_key.tx_counter >= other.network_info.network_key.tx_counter
    }
}

/// Fixture backup used across the crate's unit tests.
#[cfg(test)]
pub(crate) fn test_backup(tx_counter: u64) -> NetworkBackup {
    NetworkBackup {
        backup_time: Utc::now(),
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
