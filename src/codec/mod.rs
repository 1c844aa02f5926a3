//! Codec abstraction for frame encoding/decoding
//!
//! Separates encoding concerns from transport:
//! - **Codec**: How frames are delimited on the wire (DCS-BIOS marker, Raw)
//! - **Transport**: How bytes flow (Serial, PTY, UDP)
//!
//! # Adding a new codec
//!
//! 1. Create `codec/my_codec.rs`
//! 2. Implement the `Codec` trait
//! 3. Add `pub mod my_codec;` here

pub mod framer;
pub mod raw;

pub use framer::{DcsBiosCodec, Framer};
pub use raw::RawCodec;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;

/// A complete frame extracted from the byte stream
///
/// The payload is an owned copy: it stays valid after the codec's internal
/// buffer moves on.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame payload (marker excluded)
    pub payload: Bytes,
    /// When the frame was completed
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Codec trait for decoding a byte stream into frames and back
pub trait Codec: Send {
    /// Decode incoming bytes
    ///
    /// Calls `on_frame` for each complete frame detected and returns how many
    /// frames were emitted. May buffer partial data internally. A callback
    /// error is logged and never interrupts decoding.
    fn decode<F, E>(&mut self, data: &[u8], on_frame: F) -> usize
    where
        F: FnMut(Frame) -> Result<(), E>,
        E: fmt::Display;

    /// Encode a payload for transmission
    ///
    /// Appends encoded bytes to `output`.
    fn encode(&self, payload: &[u8], output: &mut Vec<u8>);
}
