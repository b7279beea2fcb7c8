//! USB hot-plug discovery dispatcher.
//!
//! Decouples hardware scan events from flow initiation: discoveries that
//! arrive before the flow manager is ready queue up and are flushed, in
//! order, when the dispatcher starts. Matching against registered
//! vendor/product matchers and per-device deduplication happen here.

pub mod discovery;
pub mod serial_by_id;

pub use discovery::{DispatchFn, UsbDiscovery, UsbMatcher};
pub use serial_by_id::{
    async_get_serial_by_id, device_flow_title, get_serial_by_id, human_readable_device_name,
};
