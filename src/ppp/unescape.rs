//! Streaming byte unstuffing for the client-bound direction.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{trace, warn};

use super::escape::{CONTROL_ESCAPE, ESCAPE_BIT, FLAG_SEQUENCE};
use super::fcs::{self, GOOD_FCS16, INITIAL_FCS16};
use crate::types::MAX_DATA_PAYLOAD;

/// Receives frames reconstructed by an [`Unescaper`].
pub trait FrameSink {
    fn deliver(&mut self, frame: Bytes);
}

impl FrameSink for Vec<Bytes> {
    fn deliver(&mut self, frame: Bytes) {
        self.push(frame);
    }
}

/// Incremental unescape context.
///
/// Chunks may split a frame, or an escape sequence, anywhere. State carried
/// between calls: the partial frame, a pending escape byte, and the running
/// FCS over the bytes recovered so far. All of it resets only on a flag byte
/// or when the frame buffer reaches its limit.
///
/// Delivered frames keep their 2-byte FCS trailer. A trailer that does not
/// check out is logged, not rejected.
#[derive(Debug)]
pub struct Unescaper<S> {
    sink: S,
    frame: BytesMut,
    escape_pending: bool,
    fcs: u16,
    max_frame: usize,
}

impl<S: FrameSink> Unescaper<S> {
    pub fn new(sink: S) -> Self {
        Self::with_max_frame(sink, MAX_DATA_PAYLOAD)
    }

    /// Frames longer than `max_frame` are handed over in `max_frame` pieces.
    pub fn with_max_frame(sink: S, max_frame: usize) -> Self {
        let max_frame = max_frame.max(1);
        Self {
            sink,
            frame: BytesMut::with_capacity(max_frame.min(2048)),
            escape_pending: false,
            fcs: INITIAL_FCS16,
            max_frame,
        }
    }

    /// Consume one chunk of wire bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            match byte {
                FLAG_SEQUENCE => {
                    if self.escape_pending {
                        trace!("Escape byte directly before flag");
                        self.escape_pending = false;
                        self.push(CONTROL_ESCAPE);
                    }
                    self.end_frame();
                }
                CONTROL_ESCAPE if !self.escape_pending => self.escape_pending = true,
                _ if self.escape_pending => {
                    self.escape_pending = false;
                    self.push(byte ^ ESCAPE_BIT);
                }
                _ => self.push(byte),
            }
        }
    }

    /// Hand over whatever is buffered, including a dangling escape byte.
    pub fn flush(&mut self) {
        if self.escape_pending {
            self.escape_pending = false;
            self.push(CONTROL_ESCAPE);
        }
        self.end_frame();
    }

    /// Bytes of the current, not yet delivered frame
    pub fn pending_len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_escape_pending(&self) -> bool {
        self.escape_pending
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    #[inline]
    fn push(&mut self, byte: u8) {
        self.fcs = fcs::update(self.fcs, byte);
        self.frame.put_u8(byte);

        if self.frame.len() >= self.max_frame {
            warn!(
                "Frame reached {} bytes without a flag, handing it over",
                self.max_frame
            );
            self.fcs = INITIAL_FCS16;
            self.sink.deliver(self.frame.split().freeze());
        }
    }

    fn end_frame(&mut self) {
        if self.frame.is_empty() {
            return;
        }

        if self.frame.len() < 2 || self.fcs != GOOD_FCS16 {
            warn!(
                "FCS mismatch on {}-byte frame (residual {:#06x})",
                self.frame.len(),
                self.fcs
            );
        } else {
            trace!("Frame of {} bytes passed FCS", self.frame.len());
        }

        self.fcs = INITIAL_FCS16;
        self.sink.deliver(self.frame.split().freeze());
    }
}
