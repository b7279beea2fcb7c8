//! Stable serial device path resolution.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::discovery::UsbMatcher;
use homelink_core::UsbServiceInfo;

const SERIAL_BY_ID_DIR: &str = "/dev/serial/by-id";

/// Resolve a raw serial device node to its `/dev/serial/by-id` symlink.
///
/// The by-id path survives re-enumeration across replug and reboot, so it is
/// the path worth persisting in config entries. Falls back to the raw node
/// when no symlink points at it (containers often lack the by-id directory).
pub fn get_serial_by_id(dev_path: &str) -> String {
    resolve_serial_by_id(Path::new(SERIAL_BY_ID_DIR), dev_path)
}

/// Async wrapper around [`get_serial_by_id`]; directory scans block.
pub async fn async_get_serial_by_id(dev_path: String) -> String {
    match tokio::task::spawn_blocking(move || get_serial_by_id(&dev_path)).await {
        Ok(path) => path,
        Err(err) => {
            debug!(error = %err, "serial by-id resolution task failed");
            String::new()
        }
    }
}

fn resolve_serial_by_id(by_id_dir: &Path, dev_path: &str) -> String {
    let Ok(target) = std::fs::canonicalize(dev_path) else {
        return dev_path.to_string();
    };
    let Ok(entries) = std::fs::read_dir(by_id_dir) else {
        return dev_path.to_string();
    };
    for entry in entries.flatten() {
        let link: PathBuf = entry.path();
        if let Ok(resolved) = std::fs::canonicalize(&link) {
            if resolved == target {
                return link.to_string_lossy().into_owned();
            }
        }
    }
    dev_path.to_string()
}

/// Human-readable one-line name for a discovered device, used as flow and
/// entry titles.
pub fn human_readable_device_name(info: &UsbServiceInfo) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(description) = &info.description {
        parts.push(description.clone());
    }
    if let Some(manufacturer) = &info.manufacturer {
        parts.push(format!("by {manufacturer}"));
    }
    parts.push(format!("({})", info.device));
    format!("{} - {}:{}", parts.join(" "), info.vid, info.pid)
}

/// Short title for a matched device, preferring the matcher's domain-side
/// knowledge over the raw descriptor strings.
pub fn device_flow_title(matcher: &UsbMatcher, info: &UsbServiceInfo) -> String {
    if let Some(description) = &info.description {
        return description.clone();
    }
    format!("{} device {}", matcher.domain, info.unique_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_by_id_dir_falls_back_to_raw_path() {
        let dir = std::env::temp_dir().join("homelink-usb-no-such-by-id");
        let resolved = resolve_serial_by_id(&dir, "/dev/ttyUSB99");
        assert_eq!(resolved, "/dev/ttyUSB99");
    }

    #[test]
    fn test_symlink_resolution() {
        let root = std::env::temp_dir().join(format!("homelink-usb-{}", std::process::id()));
        let by_id = root.join("serial/by-id");
        std::fs::create_dir_all(&by_id).unwrap();
        let node = root.join("ttyUSB0");
        std::fs::write(&node, b"").unwrap();
        let link = by_id.join("usb-Silicon_Labs_stick-if00-port0");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&node, &link).unwrap();

        #[cfg(unix)]
        {
            let resolved = resolve_serial_by_id(&by_id, node.to_str().unwrap());
            assert_eq!(resolved, link.to_string_lossy());
        }
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_flow_title_prefers_description() {
        let matcher = UsbMatcher::for_domain("zigbee");
        let info = UsbServiceInfo::new("/dev/ttyUSB0", 0x10c4, 0xea60)
            .with_serial_number("1234")
            .with_description("Sonoff Zigbee Dongle");
        assert_eq!(device_flow_title(&matcher, &info), "Sonoff Zigbee Dongle");

        let bare = UsbServiceInfo::new("/dev/ttyUSB0", 0x10c4, 0xea60).with_serial_number("1234");
        assert_eq!(
            device_flow_title(&matcher, &bare),
            "zigbee device 10C4:EA60_1234"
        );
    }

    #[test]
    fn test_human_readable_name() {
        let info = UsbServiceInfo::new("/dev/ttyUSB0", 0x10c4, 0xea60)
            .with_manufacturer("Silicon Labs")
            .with_description("cc2652rb stick");
        assert_eq!(
            human_readable_device_name(&info),
            "cc2652rb stick by Silicon Labs (/dev/ttyUSB0) - 10C4:EA60"
        );

        let bare = UsbServiceInfo::new("/dev/ttyUSB1", 1, 2);
        assert_eq!(human_readable_device_name(&bare), "(/dev/ttyUSB1) - 0001:0002");
    }
}
