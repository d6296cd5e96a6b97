//! BLE channel bridge library
//! Exposes the host's Bluetooth Low Energy stack to a remote peer over a
//! named-message channel.

// Module declarations
pub mod channel;
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
#[cfg(feature = "bluest")]
pub mod state;
pub mod utils;

pub use crate::channel::{Frame, MessageChannel, OutboundMessage};
pub use crate::commands::{Command, CommandKind};
pub use crate::config::AppConfig;
pub use crate::core::{Bridge, BridgeEvent, EventKind};
pub use crate::error::{BridgeError, ChannelError, HostError};
