//! DCS-BIOS marker framing
//!
//! The export stream is a sequence of frames, each introduced by the
//! synchronization marker `55 55 55 55`. A frame ends where the next marker
//! begins, so a frame is only complete once the following marker has been
//! seen. There is no length field and no escaping: payload bytes that happen
//! to spell the marker split the frame there. That ambiguity belongs to the
//! wire format and is kept as is.

use super::{Codec, Frame};
use crate::constants::FRAME_MARKER;
use bytes::{Buf, BytesMut};
use chrono::Utc;
use std::fmt;
use tracing::warn;

const MARKER_LEN: usize = FRAME_MARKER.len();

/// Bytes kept when no marker is present: a marker may straddle two reads.
const MARKER_TAIL: usize = MARKER_LEN - 1;

/// Incremental marker framer
///
/// Accumulates arbitrary chunks and emits each complete frame exactly once,
/// independent of how the stream was split into chunks. A started frame is
/// buffered without limit unless [`Framer::with_max_pending`] sets one; with
/// a limit, what gets dropped depends on chunk boundaries.
///
/// # Example
///
/// ```
/// use dcs_bios_bridge::codec::Framer;
///
/// let mut framer = Framer::new();
/// let mut frames = Vec::new();
/// framer.feed(b"\x55\x55\x55\x55ABC\x55\x55\x55\x55", |f| {
///     frames.push(f.payload);
///     Ok::<_, std::convert::Infallible>(())
/// });
/// assert_eq!(frames, vec![&b"ABC"[..]]);
/// ```
pub struct Framer {
    buffer: BytesMut,
    max_pending: Option<usize>,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            max_pending: None,
        }
    }

    /// Create a framer that drops an unterminated frame once it grows past
    /// `max_pending` bytes
    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            max_pending: Some(max_pending.max(MARKER_LEN)),
            ..Self::new()
        }
    }

    pub fn max_pending(&self) -> Option<usize> {
        self.max_pending
    }

    /// Bytes buffered while waiting for the next marker
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Discard any buffered partial frame
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Feed a chunk and emit every frame it completes
    ///
    /// Returns the number of frames emitted.
    pub fn feed<F, E>(&mut self, data: &[u8], mut on_frame: F) -> usize
    where
        F: FnMut(Frame) -> Result<(), E>,
        E: fmt::Display,
    {
        if data.is_empty() {
            return 0;
        }
        self.buffer.extend_from_slice(data);

        let mut emitted = 0;
        loop {
            let Some(start) = find_marker(&self.buffer, 0) else {
                self.keep_tail();
                break;
            };
            if start > 0 {
                self.buffer.advance(start);
            }

            let Some(end) = find_marker(&self.buffer, MARKER_LEN) else {
                if self.max_pending.is_some_and(|max| self.buffer.len() > max) {
                    warn!(
                        pending = self.buffer.len(),
                        "Dropping unterminated frame over size limit"
                    );
                    self.keep_tail();
                }
                break;
            };

            // Everything before the next marker leaves the buffer; the marker
            // itself starts the next frame.
            let raw = self.buffer.split_to(end).freeze();
            let frame = Frame {
                payload: raw.slice(MARKER_LEN..),
                timestamp: Utc::now(),
            };
            emitted += 1;

            if let Err(e) = on_frame(frame) {
                warn!(error = %e, "Frame callback failed");
            }
        }
        emitted
    }

    fn keep_tail(&mut self) {
        if self.buffer.len() > MARKER_TAIL {
            let excess = self.buffer.len() - MARKER_TAIL;
            self.buffer.advance(excess);
        }
    }
}

/// Position of the first marker at or after `from`
fn find_marker(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < from + MARKER_LEN {
        return None;
    }
    buf[from..]
        .windows(MARKER_LEN)
        .position(|w| w == FRAME_MARKER)
        .map(|pos| pos + from)
}

/// Codec for the binary DCS-BIOS export stream
///
/// - `decode`: marker-delimited frames via [`Framer`]
/// - `encode`: prefixes the payload with the marker, reproducing the wire
///   stream for serial panels that resynchronize on it
#[derive(Default)]
pub struct DcsBiosCodec {
    framer: Framer,
}

impl DcsBiosCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec whose framer drops unterminated frames over `max_pending` bytes
    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            framer: Framer::with_max_pending(max_pending),
        }
    }

    pub fn framer(&self) -> &Framer {
        &self.framer
    }
}

impl Codec for DcsBiosCodec {
    fn decode<F, E>(&mut self, data: &[u8], on_frame: F) -> usize
    where
        F: FnMut(Frame) -> Result<(), E>,
        E: fmt::Display,
    {
        self.framer.feed(data, on_frame)
    }

    fn encode(&self, payload: &[u8], output: &mut Vec<u8>) {
        output.reserve(MARKER_LEN + payload.len());
        output.extend_from_slice(&FRAME_MARKER);
        output.extend_from_slice(payload);
    }
}
