//! Discovery service-info records.
//!
//! These are the payloads a discovery source hands to a flow: the USB
//! dispatcher produces [`UsbServiceInfo`], the hardware integrations produce
//! [`HardwareServiceInfo`].

use serde::{Deserialize, Serialize};

/// Serial port configuration for a radio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Device node or socket path, e.g. `/dev/ttyUSB0` or `socket://host:9999`.
    pub path: String,
    /// Baud rate. Ignored for socket paths.
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    /// Flow control: `hardware`, `software`, or none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_control: Option<String>,
}

fn default_baudrate() -> u32 {
    115_200
}

impl PortConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baudrate: default_baudrate(),
            flow_control: None,
        }
    }

    pub fn with_baudrate(mut self, baudrate: u32) -> Self {
        self.baudrate = baudrate;
        self
    }

    pub fn with_flow_control(mut self, flow_control: impl Into<String>) -> Self {
        self.flow_control = Some(flow_control.into());
        self
    }
}

/// A USB device discovered by the dispatcher.
///
/// `vid` and `pid` are always upper-case 4-digit hex strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbServiceInfo {
    /// Device node path. Falls back to the raw node when no by-id symlink
    /// exists.
    pub device: String,
    /// Vendor ID, upper-case 4-digit hex.
    pub vid: String,
    /// Product ID, upper-case 4-digit hex.
    pub pid: String,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub description: Option<String>,
}

impl UsbServiceInfo {
    /// Build a service info record, normalizing numeric vid/pid.
    pub fn new(device: impl Into<String>, vid: u16, pid: u16) -> Self {
        Self {
            device: device.into(),
            vid: format!("{vid:04X}"),
            pid: format!("{pid:04X}"),
            serial_number: None,
            manufacturer: None,
            description: None,
        }
    }

    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Stable unique ID for this physical device.
    pub fn unique_id(&self) -> String {
        format!(
            "{}:{}_{}",
            self.vid,
            self.pid,
            self.serial_number.as_deref().unwrap_or("")
        )
    }
}

/// A radio advertised by a hardware integration (e.g. a board with an
/// on-board coordinator, or the multiprotocol add-on's network socket).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareServiceInfo {
    /// Human-readable name of the radio.
    pub name: String,
    /// Serial/socket port to reach the radio on.
    pub port: PortConfig,
    /// Radio driver type, e.g. `ezsp` or `znp`.
    pub radio_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vid_pid_formatting() {
        let info = UsbServiceInfo::new("/dev/ttyUSB0", 0x10c4, 0xea60);
        assert_eq!(info.vid, "10C4");
        assert_eq!(info.pid, "EA60");
    }

    #[test]
    fn test_unique_id() {
        let info =
            UsbServiceInfo::new("/dev/ttyUSB0", 0x10c4, 0xea60).with_serial_number("1234abcd");
        assert_eq!(info.unique_id(), "10C4:EA60_1234abcd");

        let no_serial = UsbServiceInfo::new("/dev/ttyUSB1", 1, 2);
        assert_eq!(no_serial.unique_id(), "0001:0002_");
    }

    #[test]
    fn test_port_config_roundtrip() {
        let port = PortConfig::new("/dev/ttyUSB0")
            .with_baudrate(57_600)
            .with_flow_control("hardware");
        let json = serde_json::to_value(&port).unwrap();
        assert_eq!(json["baudrate"], 57_600);
        let back: PortConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, port);
    }
}
