//! Hardware-side multiprotocol support.
//!
//! The option flow that enables, reconfigures and disables multi-PAN
//! firmware on a board's radio, and the channel manager that keeps all
//! protocols sharing that radio on one 802.15.4 channel.

pub mod channel;
pub mod multipan;

pub use channel::{
    ChannelError, ChannelManager, MultipanPlatform, CHANNEL_CHANGE_DELAY, DEFAULT_CHANNEL,
};
pub use multipan::{
    check_multipan_addon, get_zigbee_socket, is_multiprotocol_path, multipan_addon_using_device,
    MultipanHardware, MultipanOptionsFlowHandler, SerialPortSettings,
};
