//! DCS-BIOS bridge library
//!
//! Forwards DCS-BIOS export frames from a UDP multicast group to serial
//! cockpit panels, and panel output back to UDP.
//!
//! - [`codec`]: frame boundaries in the export stream
//! - [`protocol`]: text messages and outgoing commands
//! - [`transport`]: serial, PTY and multicast I/O
//! - [`bridge`]: the running bridge and its handle
//! - [`input`]: local inputs and indicator outputs
//! - [`scheduler`]: periodic commands

pub mod bridge;
pub mod cli;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod input;
pub mod logging;
pub mod protocol;
pub mod scheduler;
pub mod transport;

pub use bridge::{Bridge, BridgeHandle, State};
pub use error::{BridgeError, Result};
