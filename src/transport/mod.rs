//! Transport abstraction for byte-level I/O
//!
//! Separates I/O concerns from protocol logic:
//! - **Transport**: How bytes flow (Serial, PTY, UDP multicast)
//! - **Codec**: How frames are delimited (handled separately)
//!
//! Endpoints (serial ports, PTYs) are opened as a pair of blocking halves so
//! one thread can read while another writes. Reads return after the
//! endpoint's read timeout; "no data" shows up as `Ok(0)`, `TimedOut` or
//! `WouldBlock`, never as a failure.
//!
//! # Adding a new endpoint transport
//!
//! 1. Create `transport/my_transport.rs` returning an [`EndpointIo`]
//! 2. Add a variant to `EndpointKind` and dispatch to it in [`SystemOpener`]

#[cfg(unix)]
pub mod pty;
pub mod serial;
pub mod udp;

pub use serial::SerialTransport;
pub use udp::{MulticastSocket, UdpSender};

use crate::config::{EndpointConfig, EndpointKind};
use crate::error::Result;
use std::io::{self, Read, Write};

/// Read half of an open endpoint
pub type EndpointReader = Box<dyn Read + Send>;

/// Write half of an open endpoint
pub type EndpointWriter = Box<dyn Write + Send>;

/// Independent read and write halves of one open device
pub struct EndpointIo {
    pub reader: EndpointReader,
    pub writer: EndpointWriter,
}

/// Opens endpoints from their configuration
///
/// The bridge only talks to this trait, so tests can substitute in-memory
/// endpoints for real devices.
pub trait EndpointOpener: Send + Sync + 'static {
    /// Open the device described by `config`
    ///
    /// # Errors
    ///
    /// `EndpointOpen` if the device is missing, busy or unsupported.
    fn open(&self, config: &EndpointConfig) -> Result<EndpointIo>;
}

/// Opens real devices according to `EndpointConfig::kind`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl EndpointOpener for SystemOpener {
    fn open(&self, config: &EndpointConfig) -> Result<EndpointIo> {
        match config.kind {
            EndpointKind::Serial => SerialTransport::open(config),
            #[cfg(unix)]
            EndpointKind::Pty => pty::PtyTransport::open(config),
            #[cfg(not(unix))]
            EndpointKind::Pty => Err(crate::error::BridgeError::EndpointOpen {
                name: config.name.clone(),
                source: io::Error::new(io::ErrorKind::Unsupported, "PTY endpoints need Unix"),
            }),
        }
    }
}

/// True for read results that only mean "nothing arrived yet"
pub fn is_idle_read(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_read_kinds() {
        assert!(is_idle_read(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_idle_read(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_idle_read(&io::Error::from(io::ErrorKind::BrokenPipe)));
    }

    #[test]
    fn test_system_opener_reports_missing_device() {
        let cfg = EndpointConfig::serial("ghost", "/dev/does-not-exist-dcsb", 115_200);
        let err = SystemOpener.open(&cfg).err().expect("open should fail");
        assert!(err.to_string().contains("ghost"));
    }
}
