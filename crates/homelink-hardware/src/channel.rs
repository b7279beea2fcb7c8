//! Multi-PAN channel manager.
//!
//! All protocols sharing the multiprotocol radio (Zigbee, Thread) run on one
//! IEEE 802.15.4 channel. Changing it is coordinated here: every registered
//! platform is told the new channel and the delay before it takes effect, so
//! sleepy end devices have time to hear the announcement.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

/// Channel used when forming a new multi-PAN network.
pub const DEFAULT_CHANNEL: u8 = 15;

/// Delay before a channel change takes effect.
pub const CHANNEL_CHANGE_DELAY: Duration = Duration::from_secs(5 * 60);

/// Channel manager errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// Channel outside the 802.15.4 2.4 GHz range.
    #[error("Invalid channel: {0}")]
    InvalidChannel(u8),
}

/// A protocol stack running over the shared radio.
#[async_trait]
pub trait MultipanPlatform: Send + Sync {
    /// Protocol identifier (`zigbee`, `thread`).
    fn protocol(&self) -> &str;

    /// Move this platform's network to `channel` after `delay`.
    async fn async_change_channel(&self, channel: u8, delay: Duration);
}

/// Coordinates the shared channel across registered platforms.
#[derive(Default)]
pub struct ChannelManager {
    platforms: RwLock<HashMap<String, Arc<dyn MultipanPlatform>>>,
}

impl ChannelManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a platform, replacing any previous one for its protocol.
    pub fn register_platform(&self, platform: Arc<dyn MultipanPlatform>) {
        let protocol = platform.protocol().to_string();
        if self.platforms.write().insert(protocol.clone(), platform).is_some() {
            warn!(protocol = %protocol, "replacing registered multi-PAN platform");
        }
    }

    /// Protocols currently sharing the radio.
    pub fn async_active_platforms(&self) -> Vec<String> {
        let mut protocols: Vec<String> = self.platforms.read().keys().cloned().collect();
        protocols.sort();
        protocols
    }

    /// Announce a channel change to every active platform.
    pub async fn async_change_channel(
        &self,
        channel: u8,
        delay: Duration,
    ) -> Result<(), ChannelError> {
        if !(11..=26).contains(&channel) {
            return Err(ChannelError::InvalidChannel(channel));
        }

        let platforms: Vec<Arc<dyn MultipanPlatform>> =
            self.platforms.read().values().cloned().collect();
        info!(channel, platforms = platforms.len(), "changing multi-PAN channel");
        for platform in platforms {
            platform.async_change_channel(channel, delay).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingPlatform {
        protocol: &'static str,
        changes: Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl MultipanPlatform for RecordingPlatform {
        fn protocol(&self) -> &str {
            self.protocol
        }

        async fn async_change_channel(&self, channel: u8, _delay: Duration) {
            self.changes.lock().unwrap().push(channel);
        }
    }

    #[tokio::test]
    async fn test_change_notifies_all_platforms() {
        let manager = ChannelManager::new();
        let zigbee = Arc::new(RecordingPlatform {
            protocol: "zigbee",
            changes: Mutex::new(Vec::new()),
        });
        let thread = Arc::new(RecordingPlatform {
            protocol: "thread",
            changes: Mutex::new(Vec::new()),
        });
        manager.register_platform(zigbee.clone());
        manager.register_platform(thread.clone());

        manager
            .async_change_channel(20, CHANNEL_CHANGE_DELAY)
            .await
            .unwrap();
        assert_eq!(*zigbee.changes.lock().unwrap(), vec![20]);
        assert_eq!(*thread.changes.lock().unwrap(), vec![20]);
        assert_eq!(manager.async_active_platforms(), vec!["thread", "zigbee"]);
    }

    #[tokio::test]
    async fn test_out_of_band_channel_rejected() {
        let manager = ChannelManager::new();
        assert!(matches!(
            manager.async_change_channel(10, CHANNEL_CHANGE_DELAY).await,
            Err(ChannelError::InvalidChannel(10))
        ));
        assert!(matches!(
            manager.async_change_channel(27, CHANNEL_CHANGE_DELAY).await,
            Err(ChannelError::InvalidChannel(27))
        ));
    }
}
