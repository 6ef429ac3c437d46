//! Generator-side item messages.
//!
//! During the transfer phases the receiver's generator asks for files one
//! at a time: an NDX, two bytes of item flags, then optional fields gated
//! by those flags. The sender echoes the same header back in front of the
//! file data, so both the decoder and the echo encoder live here.

use crate::ndx::{NDX_DONE, NdxState};
use crate::{Decoded, ProtocolError};

/// A literal file transfer follows this item.
pub const ITEM_TRANSFER: u16 = 1 << 15;
/// A one-byte basis-fuzziness indicator follows the flags.
pub const ITEM_BASIS_TYPE_FOLLOWS: u16 = 1 << 11;
/// A length-prefixed alternate name follows.
pub const ITEM_XNAME_FOLLOWS: u16 = 1 << 12;

/// The per-item header fields the generator sent and the sender echoes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferAttributes {
    pub iflags: u16,
    pub basis: Option<u8>,
    pub xname: Option<Vec<u8>>,
}

impl TransferAttributes {
    /// True when the generator expects file data after the echoed header.
    pub fn is_transfer(&self) -> bool {
        self.iflags & ITEM_TRANSFER != 0
    }
}

/// The four-integer checksum header preceding the generator's block sums.
///
/// The sums themselves describe a basis file this daemon does not have, so
/// they are skipped on receipt; only the header is echoed back, whole-file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumHeader {
    pub block_count: i32,
    pub block_size: i32,
    pub checksum_length: i32,
    pub remainder: i32,
}

/// One decoded generator message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorRequest {
    /// Phase-ending `NDX_DONE`.
    Done,
    /// Request for the file at `index`.
    File {
        index: i32,
        attributes: TransferAttributes,
        checksums: Option<ChecksumHeader>,
    },
}

fn read_le_i32(input: &[u8], pos: usize) -> Option<i32> {
    let bytes = input.get(pos..pos + 4)?;
    Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decodes one generator message, including skipping any trailing block
/// sums, from demultiplexed input.
///
/// `state` is only advanced when a complete message is present; on
/// [`Decoded::NeedMore`] the caller retries with the same state and a
/// longer buffer. Negative indices other than `NDX_DONE` are not valid in
/// this direction.
pub fn decode_request(
    state: &mut NdxState,
    input: &[u8],
) -> Result<Decoded<GeneratorRequest>, ProtocolError> {
    let mut trial = state.clone();
    let Decoded::Value(index, mut pos) = trial.decode(input) else {
        return Ok(Decoded::NeedMore);
    };

    if index == NDX_DONE {
        *state = trial;
        return Ok(Decoded::Value(GeneratorRequest::Done, pos));
    }
    if index < 0 {
        return Err(ProtocolError::InvalidIndex(index));
    }

    let Some(flag_bytes) = input.get(pos..pos + 2) else {
        return Ok(Decoded::NeedMore);
    };
    let iflags = u16::from_le_bytes([flag_bytes[0], flag_bytes[1]]);
    pos += 2;

    let basis = if iflags & ITEM_BASIS_TYPE_FOLLOWS != 0 {
        let Some(&b) = input.get(pos) else { return Ok(Decoded::NeedMore) };
        pos += 1;
        Some(b)
    } else {
        None
    };

    let xname = if iflags & ITEM_XNAME_FOLLOWS != 0 {
        let Some(&first) = input.get(pos) else { return Ok(Decoded::NeedMore) };
        pos += 1;
        let len = if first & 0x80 != 0 {
            let Some(&second) = input.get(pos) else { return Ok(Decoded::NeedMore) };
            pos += 1;
            (usize::from(first & 0x7F) << 8) + usize::from(second)
        } else {
            usize::from(first)
        };
        let Some(bytes) = input.get(pos..pos + len) else {
            return Ok(Decoded::NeedMore);
        };
        pos += len;
        Some(bytes.to_vec())
    } else {
        None
    };

    let checksums = if iflags & ITEM_TRANSFER != 0 {
        let Some(block_count) = read_le_i32(input, pos) else {
            return Ok(Decoded::NeedMore);
        };
        let Some(block_size) = read_le_i32(input, pos + 4) else {
            return Ok(Decoded::NeedMore);
        };
        let Some(checksum_length) = read_le_i32(input, pos + 8) else {
            return Ok(Decoded::NeedMore);
        };
        let Some(remainder) = read_le_i32(input, pos + 12) else {
            return Ok(Decoded::NeedMore);
        };
        pos += 16;

        if block_count < 0 || checksum_length < 0 || checksum_length > 16 {
            return Err(ProtocolError::BufferOverrun);
        }
        // Skip the block sums; there is no basis file to match them against.
        let sums_len = block_count as usize * (4 + checksum_length as usize);
        if input.len() < pos + sums_len {
            return Ok(Decoded::NeedMore);
        }
        pos += sums_len;

        Some(ChecksumHeader { block_count, block_size, checksum_length, remainder })
    } else {
        None
    };

    *state = trial;
    Ok(Decoded::Value(
        GeneratorRequest::File { index, attributes: TransferAttributes { iflags, basis, xname }, checksums },
        pos,
    ))
}

/// Appends a length-prefixed name: one byte for lengths up to 0x7F,
/// otherwise two bytes with the top bit of the first set.
pub fn encode_vstring(bytes: &[u8], out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    if bytes.len() > 0x7FFF {
        return Err(ProtocolError::OverlongVstring);
    }
    if bytes.len() > 0x7F {
        out.push(0x80 | (bytes.len() >> 8) as u8);
    }
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
    Ok(())
}

/// Encodes the item-header echo that precedes file data: index, flags and
/// the optional fields in the order the generator sent them, with the
/// checksum header re-sent whole-file (the sums are not repeated).
pub fn encode_echo(
    state: &mut NdxState,
    index: i32,
    attributes: &TransferAttributes,
    checksums: Option<&ChecksumHeader>,
    out: &mut Vec<u8>,
) -> Result<(), ProtocolError> {
    state.encode(index, out);
    out.extend_from_slice(&attributes.iflags.to_le_bytes());
    if let Some(basis) = attributes.basis {
        out.push(basis);
    }
    if let Some(xname) = &attributes.xname {
        encode_vstring(xname, out)?;
    }
    if let Some(header) = checksums {
        out.extend_from_slice(&header.block_count.to_le_bytes());
        out.extend_from_slice(&header.block_size.to_le_bytes());
        out.extend_from_slice(&header.checksum_length.to_le_bytes());
        out.extend_from_slice(&header.remainder.to_le_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_wire(index: i32, iflags: u16, tail: &[u8]) -> Vec<u8> {
        let mut wire = Vec::new();
        NdxState::new().encode(index, &mut wire);
        wire.extend_from_slice(&iflags.to_le_bytes());
        wire.extend_from_slice(tail);
        wire
    }

    #[test]
    fn done_decodes_without_flags() {
        let mut state = NdxState::new();
        let result = decode_request(&mut state, &[0x00]).unwrap();
        assert_eq!(result, Decoded::Value(GeneratorRequest::Done, 1));
    }

    #[test]
    fn plain_item_has_no_optional_fields() {
        let wire = request_wire(0, 0, &[]);
        let mut state = NdxState::new();
        let Decoded::Value(GeneratorRequest::File { index, attributes, checksums }, consumed) =
            decode_request(&mut state, &wire).unwrap()
        else {
            panic!("expected a file request");
        };
        assert_eq!(index, 0);
        assert_eq!(attributes.iflags, 0);
        assert_eq!(attributes.basis, None);
        assert_eq!(attributes.xname, None);
        assert_eq!(checksums, None);
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn transfer_item_skips_block_sums() {
        let mut tail = Vec::new();
        // 2 blocks of 700 bytes, 2-byte secondary sums, 44-byte remainder.
        for v in [2i32, 700, 2, 44] {
            tail.extend_from_slice(&v.to_le_bytes());
        }
        tail.extend_from_slice(&[0xAB; 12]); // 2 * (4 + 2) sum bytes
        let wire = request_wire(3, ITEM_TRANSFER, &tail);

        let mut state = NdxState::new();
        let Decoded::Value(GeneratorRequest::File { checksums, .. }, consumed) =
            decode_request(&mut state, &wire).unwrap()
        else {
            panic!("expected a file request");
        };
        assert_eq!(
            checksums,
            Some(ChecksumHeader { block_count: 2, block_size: 700, checksum_length: 2, remainder: 44 })
        );
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn basis_and_xname_fields_decode_in_order() {
        let mut tail = vec![0x02]; // basis byte
        tail.push(4);
        tail.extend_from_slice(b"name");
        let wire = request_wire(1, ITEM_BASIS_TYPE_FOLLOWS | ITEM_XNAME_FOLLOWS, &tail);

        let mut state = NdxState::new();
        let Decoded::Value(GeneratorRequest::File { attributes, .. }, _) =
            decode_request(&mut state, &wire).unwrap()
        else {
            panic!("expected a file request");
        };
        assert_eq!(attributes.basis, Some(0x02));
        assert_eq!(attributes.xname.as_deref(), Some(&b"name"[..]));
    }

    #[test]
    fn two_byte_xname_length_decodes() {
        let long_name = vec![b'x'; 300];
        let mut tail = vec![0x80 | (300u16 >> 8) as u8, (300u16 & 0xFF) as u8];
        tail.extend_from_slice(&long_name);
        let wire = request_wire(1, ITEM_XNAME_FOLLOWS, &tail);

        let mut state = NdxState::new();
        let Decoded::Value(GeneratorRequest::File { attributes, .. }, _) =
            decode_request(&mut state, &wire).unwrap()
        else {
            panic!("expected a file request");
        };
        assert_eq!(attributes.xname.map(|n| n.len()), Some(300));
    }

    #[test]
    fn negative_index_is_rejected() {
        let mut wire = Vec::new();
        NdxState::new().encode(-105, &mut wire);
        let mut state = NdxState::new();
        assert_eq!(decode_request(&mut state, &wire), Err(ProtocolError::InvalidIndex(-105)));
    }

    #[test]
    fn partial_request_advances_no_state() {
        let mut tail = Vec::new();
        for v in [1i32, 700, 2, 0] {
            tail.extend_from_slice(&v.to_le_bytes());
        }
        tail.extend_from_slice(&[0u8; 6]);
        let wire = request_wire(0, ITEM_TRANSFER, &tail);

        let mut state = NdxState::new();
        for end in 0..wire.len() {
            assert_eq!(decode_request(&mut state, &wire[..end]).unwrap(), Decoded::NeedMore);
        }
        // The full buffer still decodes with the untouched state.
        let Decoded::Value(GeneratorRequest::File { index, .. }, _) =
            decode_request(&mut state, &wire).unwrap()
        else {
            panic!("expected a file request");
        };
        assert_eq!(index, 0);
    }

    #[test]
    fn echo_replays_header_without_sums() {
        let attributes = TransferAttributes {
            iflags: ITEM_TRANSFER | ITEM_BASIS_TYPE_FOLLOWS,
            basis: Some(1),
            xname: None,
        };
        let header = ChecksumHeader { block_count: 2, block_size: 700, checksum_length: 2, remainder: 44 };
        let mut out = Vec::new();
        let mut state = NdxState::new();
        encode_echo(&mut state, 0, &attributes, Some(&header), &mut out).unwrap();

        let mut expected = vec![0x01]; // ndx 0 as delta
        expected.extend_from_slice(&attributes.iflags.to_le_bytes());
        expected.push(1);
        for v in [2i32, 700, 2, 44] {
            expected.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(out, expected);
    }

    #[test]
    fn echoed_xname_carries_its_bytes() {
        let attributes = TransferAttributes { iflags: ITEM_XNAME_FOLLOWS, basis: None, xname: Some(b"alt".to_vec()) };
        let mut out = Vec::new();
        let mut state = NdxState::new();
        encode_echo(&mut state, 0, &attributes, None, &mut out).unwrap();
        assert_eq!(&out[3..], &[3, b'a', b'l', b't']);
    }
}
