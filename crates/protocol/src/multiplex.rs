//! rsync multiplexed-channel framing.
//!
//! After session setup every message travels in a frame: a 4-byte header
//! whose low three bytes are the little-endian payload length and whose
//! high byte is the message code plus [`MPLEX_BASE`], followed by the
//! payload. A sender-only daemon accepts nothing but data frames inbound;
//! any other tag aborts the connection.

use crate::{Decoded, ProtocolError};

/// Offset added to message codes on the wire.
pub const MPLEX_BASE: u8 = 7;

/// Largest payload one frame can carry (24-bit length field).
pub const MAX_FRAME_PAYLOAD: usize = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCode {
    Data,
    ErrorXfer,
    Info,
    Error,
    Warning,
}

impl MessageCode {
    pub const fn value(self) -> u8 {
        match self {
            Self::Data => 0,
            Self::ErrorXfer => 1,
            Self::Info => 2,
            Self::Error => 3,
            Self::Warning => 4,
        }
    }
}

/// Appends one frame wrapping `payload`.
///
/// Callers split larger payloads across frames; the session's write path
/// never produces a single chunk near the 16 MiB frame limit.
pub fn encode_frame(code: MessageCode, payload: &[u8], out: &mut Vec<u8>) {
    debug_assert!(payload.len() <= MAX_FRAME_PAYLOAD);
    let header = payload.len() as u32 | u32::from(code.value() + MPLEX_BASE) << 24;
    out.extend_from_slice(&header.to_le_bytes());
    out.extend_from_slice(payload);
}

/// A decoded inbound frame borrowing its payload from the input buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub tag: u8,
    pub payload: &'a [u8],
}

impl Frame<'_> {
    /// True when this is a plain data frame.
    pub fn is_data(&self) -> bool {
        self.tag == MessageCode::Data.value() + MPLEX_BASE
    }
}

/// Decodes one frame from `input` if a complete one is present.
///
/// A partial header or payload yields [`Decoded::NeedMore`] and consumes
/// nothing; the caller retries with the same (grown) buffer. Tags below
/// the multiplex base are malformed and rejected outright.
pub fn decode_frame(input: &[u8]) -> Result<Decoded<Frame<'_>>, ProtocolError> {
    if input.len() < 4 {
        return Ok(Decoded::NeedMore);
    }
    let header = u32::from_le_bytes([input[0], input[1], input[2], input[3]]);
    let len = (header & 0x00FF_FFFF) as usize;
    let tag = (header >> 24) as u8;

    if tag < MPLEX_BASE {
        return Err(ProtocolError::UnexpectedMultiplexTag(tag));
    }
    if input.len() < 4 + len {
        return Ok(Decoded::NeedMore);
    }

    Ok(Decoded::Value(Frame { tag, payload: &input[4..4 + len] }, 4 + len))
}
