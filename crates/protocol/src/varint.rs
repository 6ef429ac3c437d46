//! rsync's variable-length integer wire formats.
//!
//! Two encodings from upstream `io.c` are implemented: the 32-bit varint
//! (`write_varint`/`read_varint`) used for lengths and counts, and the
//! 64-bit varlong (`write_varlong`/`read_varlong`) with a caller-chosen
//! minimum byte count, used for file sizes (min 3) and mtimes (min 4).
//! Both decoders operate on byte slices and report a short buffer as
//! [`Decoded::NeedMore`] so callers can resume once more input arrives.

use crate::{Decoded, ProtocolError};

/// Extra-byte lookup for the leading varint tag, indexed by `tag / 4`.
///
/// Mirrors `int_byte_extra` from upstream `io.c`; each entry is the number
/// of payload bytes that follow the tag for that high-bit pattern.
const INT_BYTE_EXTRA: [u8; 64] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // (0x00-0x3F) / 4
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // (0x40-0x7F) / 4
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // (0x80-0xBF) / 4
    2, 2, 2, 2, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 5, 6, // (0xC0-0xFF) / 4
];

/// Maximum payload bytes after the tag for a well-formed 32-bit varint.
const MAX_EXTRA_BYTES: usize = 4;

/// Appends `value` in rsync's variable-length i32 format.
///
/// The leading byte's high bits indicate how many payload bytes follow:
/// `0xxx_xxxx` none, `10xx_xxxx` one, `110x_xxxx` two, `1110_xxxx` three,
/// `1111_0xxx` four (full i32).
pub fn encode_varint(value: i32, out: &mut Vec<u8>) {
    let mut bytes = [0u8; 5];
    bytes[1..5].copy_from_slice(&value.to_le_bytes());

    // Minimum number of significant payload bytes.
    let mut count = 4usize;
    while count > 1 && bytes[count] == 0 {
        count -= 1;
    }

    let bit = 1u8 << (7 - (count - 1) as u32);
    let current = bytes[count];

    if current >= bit {
        // Highest byte collides with the marker bits: spill to one more byte.
        count += 1;
        bytes[0] = !(bit - 1);
    } else if count > 1 {
        let double_bit = bit << 1;
        bytes[0] = current | !(double_bit - 1);
    } else {
        bytes[0] = bytes[1];
    }

    out.extend_from_slice(&bytes[..count]);
}

/// Decodes an i32 from rsync's variable-length format.
pub fn decode_varint(input: &[u8]) -> Result<Decoded<i32>, ProtocolError> {
    let Some(&first) = input.first() else {
        return Ok(Decoded::NeedMore);
    };

    let extra = INT_BYTE_EXTRA[(first / 4) as usize] as usize;
    if extra > MAX_EXTRA_BYTES {
        return Err(ProtocolError::VarintOverflow);
    }
    if input.len() < 1 + extra {
        return Ok(Decoded::NeedMore);
    }

    let mut buf = [0u8; 4];
    if extra == 0 {
        buf[0] = first;
    } else {
        buf[..extra].copy_from_slice(&input[1..1 + extra]);
        if extra < 4 {
            // Unmasked tag bits are the highest payload byte; with four
            // payload bytes the tag contributes nothing.
            let bit = 1u8 << (8 - extra as u32);
            buf[extra] = first & (bit - 1);
        }
    }

    Ok(Decoded::Value(i32::from_le_bytes(buf), 1 + extra))
}

/// Appends `value` in rsync's varlong format.
///
/// Mirrors upstream `write_varlong(f, x, min_bytes)`: at least `min_bytes`
/// bytes are always produced, and the leading byte's consecutive high bits
/// count how many bytes beyond the minimum follow. The boundary bit for a
/// `count`-byte encoding is `1 << (7 - count + min_bytes)`.
pub fn encode_varlong(value: i64, min_bytes: u8, out: &mut Vec<u8>) {
    let bytes = value.to_le_bytes();

    let mut cnt = 8usize;
    while cnt > min_bytes as usize && bytes[cnt - 1] == 0 {
        cnt -= 1;
    }

    let bit = 1u8 << ((7 + min_bytes as usize).wrapping_sub(cnt));
    let leading = if bytes[cnt - 1] >= bit {
        cnt += 1;
        !(bit - 1)
    } else if cnt > min_bytes as usize {
        bytes[cnt - 1] | !(bit * 2 - 1)
    } else {
        bytes[cnt - 1]
    };

    out.push(leading);
    out.extend_from_slice(&bytes[..cnt - 1]);
}

/// Decodes an i64 written by [`encode_varlong`] with the same `min_bytes`.
pub fn decode_varlong(input: &[u8], min_bytes: u8) -> Decoded<i64> {
    let Some(&leading) = input.first() else {
        return Decoded::NeedMore;
    };

    // The run of high marker bits counts the bytes beyond the minimum; a
    // nine-byte encoding carries the full value in the payload and the
    // leading byte is markers only.
    let run = leading.leading_ones() as usize;
    let cnt = (min_bytes as usize + run).min(9);
    if input.len() < cnt {
        return Decoded::NeedMore;
    }

    let payload = cnt - 1;
    let mut bytes = [0u8; 8];
    if payload >= 8 {
        bytes.copy_from_slice(&input[1..9]);
    } else {
        bytes[..payload].copy_from_slice(&input[1..cnt]);
        let mask = if run == 0 { 0xFF } else { (1u8 << (8 - run)).wrapping_sub(1) };
        bytes[payload] = leading & mask;
    }

    Decoded::Value(i64::from_le_bytes(bytes), cnt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encoded(value: i32) -> Vec<u8> {
        let mut out = Vec::new();
        encode_varint(value, &mut out);
        out
    }

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn varint_golden_encodings() {
        // (value, wire hex) pairs observed from upstream rsync.
        let cases: &[(i32, &str)] = &[
            (0, "00"),
            (1, "01"),
            (127, "7f"),
            (128, "8080"),
            (255, "80ff"),
            (16383, "bfff"),
            (16384, "c00040"),
            (-1, "f0ffffffff"),
            (i32::MAX, "f0ffffff7f"),
            (i32::MIN, "f000000080"),
        ];
        for &(value, wire) in cases {
            assert_eq!(hex(&encoded(value)), wire, "encoding {value}");
        }
    }

    #[test]
    fn varint_round_trip_boundaries() {
        for value in [0, 1, 63, 64, 127, 128, 16383, 16384, 2097151, 2097152, -1, i32::MAX, i32::MIN] {
            let wire = encoded(value);
            let Ok(Decoded::Value(decoded, consumed)) = decode_varint(&wire) else {
                panic!("decode failed for {value}");
            };
            assert_eq!(decoded, value);
            assert_eq!(consumed, wire.len());
        }
    }

    #[test]
    fn varint_short_buffer_is_need_more() {
        let wire = encoded(16384);
        for len in 0..wire.len() {
            assert_eq!(decode_varint(&wire[..len]).unwrap(), Decoded::NeedMore);
        }
    }

    #[test]
    fn varlong_size_golden_bytes() {
        // File size 170 with min 3 bytes, as it appears in a list entry.
        let mut out = Vec::new();
        encode_varlong(170, 3, &mut out);
        assert_eq!(out, [0x00, 0xaa, 0x00]);
    }

    #[test]
    fn varlong_mtime_golden_bytes() {
        let mut out = Vec::new();
        encode_varlong(0x52F48200, 4, &mut out);
        assert_eq!(out, [0x52, 0x00, 0x82, 0xf4]);
    }

    #[test]
    fn varlong_zero_uses_minimum_bytes() {
        for min_bytes in 1..=8u8 {
            let mut out = Vec::new();
            encode_varlong(0, min_bytes, &mut out);
            assert_eq!(out.len(), min_bytes as usize);
            assert!(out.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn varlong_round_trip_boundaries() {
        for min_bytes in [1u8, 3, 4] {
            for value in [0i64, 1, 0x7f, 0x80, 0xFFFF, 0x7FFFFF, 0x800000, i64::from(u32::MAX), 1 << 40, i64::MAX] {
                let mut wire = Vec::new();
                encode_varlong(value, min_bytes, &mut wire);
                let Decoded::Value(decoded, consumed) = decode_varlong(&wire, min_bytes) else {
                    panic!("decode failed for {value} (min {min_bytes})");
                };
                assert_eq!(decoded, value, "min {min_bytes}");
                assert_eq!(consumed, wire.len());
            }
        }
    }

    #[test]
    fn varlong_short_buffer_is_need_more() {
        let mut wire = Vec::new();
        encode_varlong(1 << 40, 3, &mut wire);
        for len in 0..wire.len() {
            assert_eq!(decode_varlong(&wire[..len], 3), Decoded::NeedMore);
        }
    }

    proptest! {
        #[test]
        fn varint_round_trips(value in any::<i32>()) {
            let wire = encoded(value);
            prop_assert!(wire.len() <= 5);
            let Decoded::Value(decoded, consumed) = decode_varint(&wire).unwrap() else {
                return Err(TestCaseError::fail("incomplete"));
            };
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, wire.len());
        }

        #[test]
        fn varlong_round_trips(value in 0i64.., min_bytes in 1u8..=8) {
            let mut wire = Vec::new();
            encode_varlong(value, min_bytes, &mut wire);
            let Decoded::Value(decoded, consumed) = decode_varlong(&wire, min_bytes) else {
                return Err(TestCaseError::fail("incomplete"));
            };
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, wire.len());
        }

        #[test]
        fn varint_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..6)) {
            let _ = decode_varint(&bytes);
        }
    }
}
