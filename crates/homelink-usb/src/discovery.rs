//! USB discovery dispatch.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use homelink_core::UsbServiceInfo;

/// Callback that initiates a flow for a matched device.
pub type DispatchFn =
    Arc<dyn Fn(String, UsbServiceInfo) -> BoxFuture<'static, ()> + Send + Sync>;

/// Registered matcher for one integration.
///
/// A device matches when every present field matches the corresponding
/// device field; a matcher with no constraints matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsbMatcher {
    /// Integration domain to dispatch to.
    pub domain: String,
    /// Vendor ID, upper-case 4-digit hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vid: Option<String>,
    /// Product ID, upper-case 4-digit hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    /// Glob pattern matched case-insensitively against the serial number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// Glob pattern matched case-insensitively against the manufacturer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    /// Glob pattern matched case-insensitively against the description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl UsbMatcher {
    pub fn for_domain(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }

    pub fn with_vid(mut self, vid: impl Into<String>) -> Self {
        self.vid = Some(vid.into());
        self
    }

    pub fn with_pid(mut self, pid: impl Into<String>) -> Self {
        self.pid = Some(pid.into());
        self
    }

    pub fn with_serial_number(mut self, pattern: impl Into<String>) -> Self {
        self.serial_number = Some(pattern.into());
        self
    }

    pub fn with_manufacturer(mut self, pattern: impl Into<String>) -> Self {
        self.manufacturer = Some(pattern.into());
        self
    }

    pub fn with_description(mut self, pattern: impl Into<String>) -> Self {
        self.description = Some(pattern.into());
        self
    }

    /// Whether the device satisfies every constraint this matcher carries.
    pub fn matches(&self, info: &UsbServiceInfo) -> bool {
        if let Some(vid) = &self.vid {
            if vid != &info.vid {
                return false;
            }
        }
        if let Some(pid) = &self.pid {
            if pid != &info.pid {
                return false;
            }
        }
        if let Some(pattern) = &self.serial_number {
            if !matches_pattern(pattern, info.serial_number.as_deref()) {
                return false;
            }
        }
        if let Some(pattern) = &self.manufacturer {
            if !matches_pattern(pattern, info.manufacturer.as_deref()) {
                return false;
            }
        }
        if let Some(pattern) = &self.description {
            if !matches_pattern(pattern, info.description.as_deref()) {
                return false;
            }
        }
        true
    }

    /// Number of constraints; used to pick the most targeted matcher.
    fn specificity(&self) -> usize {
        [
            self.vid.is_some(),
            self.pid.is_some(),
            self.serial_number.is_some(),
            self.manufacturer.is_some(),
            self.description.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

/// Case-insensitive glob match (`*` matches any run of characters).
///
/// An absent device field never matches a present pattern.
fn matches_pattern(pattern: &str, value: Option<&str>) -> bool {
    let Some(value) = value else {
        return false;
    };
    glob_match(&pattern.to_lowercase(), &value.to_lowercase())
}

fn glob_match(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();
    glob_match_at(&pattern, &value)
}

fn glob_match_at(pattern: &[char], value: &[char]) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some(('*', rest)) => {
            (0..=value.len()).any(|skip| glob_match_at(rest, &value[skip..]))
        }
        Some((ch, rest)) => value
            .split_first()
            .map(|(v, vs)| v == ch && glob_match_at(rest, vs))
            .unwrap_or(false),
    }
}

struct DispatcherState {
    started: bool,
    pending_flows: Vec<(String, UsbServiceInfo)>,
    seen: HashSet<(String, String, Option<String>)>,
}

/// Queues and dispatches USB discoveries to integration flows.
pub struct UsbDiscovery {
    matchers: Vec<UsbMatcher>,
    state: Mutex<DispatcherState>,
    dispatch: DispatchFn,
}

impl UsbDiscovery {
    pub fn new(matchers: Vec<UsbMatcher>, dispatch: DispatchFn) -> Arc<Self> {
        Arc::new(Self {
            matchers,
            state: Mutex::new(DispatcherState {
                started: false,
                pending_flows: Vec::new(),
                seen: HashSet::new(),
            }),
            dispatch,
        })
    }

    /// Start the dispatcher: flush queued discoveries in arrival order and
    /// switch to immediate dispatch for new ones.
    pub async fn async_start(&self) {
        let flushed = {
            let mut state = self.state.lock();
            state.started = true;
            std::mem::take(&mut state.pending_flows)
        };
        debug!(queued = flushed.len(), "starting USB discovery dispatch");
        for (domain, info) in flushed {
            tokio::spawn((self.dispatch)(domain, info));
        }
    }

    /// Process one discovered device.
    ///
    /// The device is matched against the registered matchers; the most
    /// targeted matching integration gets the flow. A device already seen
    /// in this process lifetime is ignored.
    pub fn discovered(&self, info: UsbServiceInfo) {
        // First registered matcher wins a specificity tie.
        let mut best: Option<&UsbMatcher> = None;
        for matcher in self.matchers.iter().filter(|m| m.matches(&info)) {
            if best.map_or(true, |b| matcher.specificity() > b.specificity()) {
                best = Some(matcher);
            }
        }
        let Some(matcher) = best else {
            return;
        };
        let domain = matcher.domain.clone();

        let mut state = self.state.lock();
        let key = (
            info.vid.clone(),
            info.pid.clone(),
            info.serial_number.clone(),
        );
        if !state.seen.insert(key) {
            debug!(vid = %info.vid, pid = %info.pid, "device already seen, skipping");
            return;
        }

        if state.started {
            drop(state);
            debug!(domain = %domain, device = %info.device, "dispatching USB discovery");
            tokio::spawn((self.dispatch)(domain, info));
        } else {
            debug!(domain = %domain, device = %info.device, "queueing USB discovery");
            state.pending_flows.push((domain, info));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> UsbServiceInfo {
        UsbServiceInfo::new("/dev/ttyUSB0", 0x10c4, 0xea60)
            .with_serial_number("slae.sh cc2652rb stick")
            .with_manufacturer("Silicon Labs")
            .with_description("slae.sh cc2652rb stick - slaesh's iot stuff")
    }

    #[test]
    fn test_wildcard_matcher_matches_everything() {
        assert!(UsbMatcher::for_domain("any").matches(&device()));
    }

    #[test]
    fn test_vid_pid_equality() {
        let matcher = UsbMatcher::for_domain("zigbee").with_vid("10C4").with_pid("EA60");
        assert!(matcher.matches(&device()));

        let wrong_pid = UsbMatcher::for_domain("zigbee").with_vid("10C4").with_pid("0001");
        assert!(!wrong_pid.matches(&device()));
    }

    #[test]
    fn test_glob_patterns_case_insensitive() {
        let matcher = UsbMatcher::for_domain("zigbee").with_description("*slae.sh*");
        assert!(matcher.matches(&device()));

        let matcher = UsbMatcher::for_domain("zigbee").with_manufacturer("silicon labs");
        assert!(matcher.matches(&device()));

        let matcher = UsbMatcher::for_domain("zigbee").with_serial_number("nomatch*");
        assert!(!matcher.matches(&device()));
    }

    #[test]
    fn test_absent_field_never_matches() {
        let info = UsbServiceInfo::new("/dev/ttyUSB1", 0x10c4, 0xea60);
        let matcher = UsbMatcher::for_domain("zigbee").with_serial_number("*");
        assert!(!matcher.matches(&info));
    }
}
