//! Supervisor add-on lifecycle management.
//!
//! An add-on is a supervisor-managed auxiliary service (multiprotocol
//! bridge, firmware flasher) with install/start/stop/uninstall lifecycle.
//! This crate defines the manager contract flows consume, waiting helpers
//! that poll an add-on into a target state, and the per-slug manager
//! registry.

pub mod manager;
pub mod registry;

pub use manager::{
    AddonError, AddonInfo, AddonManager, AddonState, WaitingAddon,
    ADDON_STATE_POLL_INTERVAL, ADDON_SETUP_TIMEOUT_ROUNDS,
};
pub use registry::AddonManagerRegistry;
