//! rsync-flavored deflate.
//!
//! File data travels as a raw (headerless) deflate stream, flushed with a
//! sync flush and with the trailing four-byte empty-block marker stripped;
//! the receiver re-appends the marker before inflating. Compression level 6
//! matches what stock rsync negotiates by default.

use flate2::{Compress, Compression, FlushCompress};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("deflate failed: {0}")]
pub struct CompressError(#[from] flate2::CompressError);

/// Deflates `input` the way rsync's token stream expects it.
pub fn deflate(input: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut compress = Compress::new(Compression::new(6), false);
    let mut out = Vec::with_capacity(input.len() + input.len() / 10 + 64);

    loop {
        let consumed = compress.total_in() as usize;
        compress.compress_vec(&input[consumed..], &mut out, FlushCompress::Sync)?;
        // The flush is complete once all input is consumed and deflate
        // stopped short of the buffer's capacity.
        if compress.total_in() as usize == input.len() && out.len() < out.capacity() {
            break;
        }
        out.reserve(4096);
    }

    // Drop the 00 00 FF FF marker the sync flush appended.
    out.truncate(out.len().saturating_sub(4));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn golden_stream() {
        let out = deflate(b"badumpsh\n").unwrap();
        assert_eq!(out, [0x4a, 0x4a, 0x4c, 0x29, 0xcd, 0x2d, 0x28, 0xce, 0xe0, 0x02, 0x00]);
    }

    #[test]
    fn stream_never_ends_with_the_sync_marker() {
        for body in [&b""[..], b"a", &[0u8; 100_000], b"the quick brown fox"] {
            let out = deflate(body).unwrap();
            assert!(!out.ends_with(&[0x00, 0x00, 0xFF, 0xFF]));
        }
    }

    #[test]
    fn incompressible_input_still_terminates() {
        // A pseudo-random buffer larger than the initial reserve headroom.
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        let body: Vec<u8> = (0..200_000)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect();
        let out = deflate(&body).unwrap();
        assert!(out.len() >= body.len());
    }
}
