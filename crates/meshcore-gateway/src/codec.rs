//! Length-delimited frame codec for the TCP side of the gateway
//!
//! Every frame is a sync byte (`0x3C`), a little-endian `u16` payload length
//! and the payload itself. TCP is byte-clean, so the decoder tracks only the
//! header and declared length; it never scans payload bytes for the sync
//! marker.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::config::{FRAME_HEADER_LEN, FRAME_SYNC, MAX_FRAME_PAYLOAD};
use crate::error::{GatewayError, Result};

/// Frame a payload for TCP transmission
///
/// Fails with [`GatewayError::PayloadTooLarge`] when the payload does not fit
/// the 16-bit length field.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    let length = u16::try_from(payload.len()).map_err(|_| GatewayError::PayloadTooLarge {
        size: payload.len(),
        max: MAX_FRAME_PAYLOAD,
    })?;

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_u8(FRAME_SYNC);
    frame.put_u16_le(length);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Parsing state of the frame in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Collecting the 3-byte header; holds the number of header bytes seen
    Header(usize),
    /// Header complete, collecting `len` payload bytes
    Payload { len: usize },
}

/// Incremental decoder for one TCP connection
///
/// Holds exactly one in-progress frame. Feed it every chunk read from the
/// socket with [`FrameDecoder::push`]; completed payloads come out in order.
#[derive(Debug)]
pub struct FrameDecoder {
    header: [u8; FRAME_HEADER_LEN],
    payload: BytesMut,
    state: State,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder waiting for a frame header
    pub fn new() -> Self {
        Self {
            header: [0; FRAME_HEADER_LEN],
            payload: BytesMut::new(),
            state: State::Header(0),
        }
    }

    /// Consume `data` and return every payload completed by it
    ///
    /// All of `data` is consumed; bytes belonging to an unfinished frame are
    /// kept for the next call.
    pub fn push(&mut self, mut data: &[u8]) -> Vec<Bytes> {
        let mut frames = Vec::new();

        while !data.is_empty() {
            match self.state {
                State::Header(filled) => {
                    let take = (FRAME_HEADER_LEN - filled).min(data.len());
                    self.header[filled..filled + take].copy_from_slice(&data[..take]);
                    data = &data[take..];

                    let filled = filled + take;
                    if filled < FRAME_HEADER_LEN {
                        self.state = State::Header(filled);
                        continue;
                    }

                    if self.header[0] != FRAME_SYNC {
                        debug!(sync = self.header[0], "Unexpected frame sync byte");
                    }
                    let len = u16::from_le_bytes([self.header[1], self.header[2]]) as usize;
                    if len == 0 {
                        frames.push(Bytes::new());
                        self.state = State::Header(0);
                    } else {
                        self.payload.reserve(len);
                        self.state = State::Payload { len };
                    }
                }
                State::Payload { len } => {
                    let take = (len - self.payload.len()).min(data.len());
                    self.payload.extend_from_slice(&data[..take]);
                    data = &data[take..];

                    if self.payload.len() == len {
                        frames.push(self.payload.split().freeze());
                        self.state = State::Header(0);
                    }
                }
            }
        }

        frames
    }

    /// Discard any partially received frame
    pub fn reset(&mut self) {
        self.payload.clear();
        self.state = State::Header(0);
    }

    /// True when no partial frame is buffered
    pub fn is_idle(&self) -> bool {
        self.state == State::Header(0)
    }

    /// Number of bytes of the in-progress frame received so far
    pub fn buffered(&self) -> usize {
        match self.state {
            State::Header(filled) => filled,
            State::Payload { .. } => FRAME_HEADER_LEN + self.payload.len(),
        }
    }
}
