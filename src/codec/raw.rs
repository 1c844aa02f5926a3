//! Datagram pass-through for `framing = "raw"`
//!
//! Every non-empty datagram becomes one frame, markers and all. Nothing is
//! buffered between calls, so a datagram never bleeds into the next one.

use super::{Codec, Frame};
use bytes::Bytes;
use std::fmt;
use tracing::warn;

/// Forwards each datagram to the endpoints exactly as received
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl Codec for RawCodec {
    fn decode<F, E>(&mut self, data: &[u8], mut on_frame: F) -> usize
    where
        F: FnMut(Frame) -> Result<(), E>,
        E: fmt::Display,
    {
        if data.is_empty() {
            return 0;
        }
        if let Err(e) = on_frame(Frame::new(Bytes::copy_from_slice(data))) {
            warn!(error = %e, len = data.len(), "Datagram callback failed");
        }
        1
    }

    fn encode(&self, payload: &[u8], output: &mut Vec<u8>) {
        output.extend_from_slice(payload);
    }
}
