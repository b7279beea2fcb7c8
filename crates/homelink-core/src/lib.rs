//! Core types shared across the HomeLink onboarding subsystem.
//!
//! This crate defines the foundational pieces the rest of the workspace
//! builds on:
//! - The config entry store (persisted integration configuration)
//! - Discovery service-info records (USB and hardware)

pub mod config_entries;
pub mod service_info;

pub use config_entries::{
    ConfigEntry, ConfigEntryError, ConfigEntryState, ConfigEntryStore,
};
pub use service_info::{HardwareServiceInfo, PortConfig, UsbServiceInfo};
