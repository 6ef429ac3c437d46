//! File-index (NDX) delta encoding for the rsync protocol.
//!
//! Protocol 30 transmits file-list indices as deltas against the previous
//! value of the same sign, with single-byte sentinels for the common cases.
//! The two running cursors live in [`NdxState`]; every session owns its own
//! pair (one for each direction) rather than sharing process-global state.

use crate::Decoded;

/// End of file requests for the current phase.
pub const NDX_DONE: i32 = -1;
/// No more incremental file lists will follow.
pub const NDX_FLIST_EOF: i32 = -2;
/// Base for incremental file-list block announcements; block `n` is sent
/// as `NDX_FLIST_OFFSET - n`.
pub const NDX_FLIST_OFFSET: i32 = -101;

/// Delta cursors for NDX encoding, one per direction per session.
#[derive(Debug, Clone)]
pub struct NdxState {
    prev_positive: i32,
    prev_negative: i32,
}

impl Default for NdxState {
    fn default() -> Self {
        Self::new()
    }
}

impl NdxState {
    /// Upstream initial values: `prev_positive = -1, prev_negative = 1`.
    pub const fn new() -> Self {
        Self { prev_positive: -1, prev_negative: 1 }
    }

    /// Appends `ndx` using the byte-reduction method.
    ///
    /// `NDX_DONE` is a bare zero byte with no cursor update. Other negative
    /// values are prefixed with `0xFF` and delta-encoded by magnitude.
    /// Deltas of 1..=0xFD fit in one byte; otherwise `0xFE` introduces
    /// either a 2-byte delta (0..=0x7FFF) or the full 4-byte index with the
    /// top bit of the high byte forced on.
    pub fn encode(&mut self, ndx: i32, out: &mut Vec<u8>) {
        let (diff, magnitude) = if ndx >= 0 {
            let diff = ndx - self.prev_positive;
            self.prev_positive = ndx;
            (diff, ndx)
        } else if ndx == NDX_DONE {
            out.push(0x00);
            return;
        } else {
            out.push(0xFF);
            let magnitude = -ndx;
            let diff = magnitude - self.prev_negative;
            self.prev_negative = magnitude;
            (diff, magnitude)
        };

        if diff > 0 && diff < 0xFE {
            out.push(diff as u8);
        } else if !(0..=0x7FFF).contains(&diff) {
            out.push(0xFE);
            out.push(((magnitude >> 24) as u8) | 0x80);
            out.push(magnitude as u8);
            out.push((magnitude >> 8) as u8);
            out.push((magnitude >> 16) as u8);
        } else {
            out.push(0xFE);
            out.push((diff >> 8) as u8);
            out.push(diff as u8);
        }
    }

    /// Decodes one index from `input`, mirroring [`NdxState::encode`].
    ///
    /// The cursors are only advanced when a complete encoding is present;
    /// a short buffer yields [`Decoded::NeedMore`] and leaves the state
    /// untouched, so the same call can simply be repeated later.
    pub fn decode(&mut self, input: &[u8]) -> Decoded<i32> {
        let mut pos = 0usize;

        let Some(&first) = input.get(pos) else { return Decoded::NeedMore };
        pos += 1;

        let (negative, b) = if first == 0xFF {
            let Some(&second) = input.get(pos) else { return Decoded::NeedMore };
            pos += 1;
            (true, second)
        } else if first == 0 {
            return Decoded::Value(NDX_DONE, pos);
        } else {
            (false, first)
        };

        let prev = if negative { self.prev_negative } else { self.prev_positive };

        let num = if b == 0xFE {
            let Some(&high) = input.get(pos) else { return Decoded::NeedMore };
            pos += 1;
            if high & 0x80 != 0 {
                // Full 4-byte index: low, middle, high-middle bytes follow.
                if input.len() < pos + 3 {
                    return Decoded::NeedMore;
                }
                let value = i32::from(high & !0x80) << 24
                    | i32::from(input[pos])
                    | i32::from(input[pos + 1]) << 8
                    | i32::from(input[pos + 2]) << 16;
                pos += 3;
                value
            } else {
                let Some(&low) = input.get(pos) else { return Decoded::NeedMore };
                pos += 1;
                prev + (i32::from(high) << 8 | i32::from(low))
            }
        } else {
            prev + i32::from(b)
        };

        if negative {
            self.prev_negative = num;
        } else {
            self.prev_positive = num;
        }

        Decoded::Value(if negative { -num } else { num }, pos)
    }
}
