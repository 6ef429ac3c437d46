//! Daemon greeting exchange and protocol version negotiation.

use memchr::memchr;

use crate::{Decoded, ProtocolError};

/// The greeting this daemon sends as soon as a connection opens.
pub const GREETING: &[u8] = b"@RSYNCD: 30.0\n";

/// Highest protocol this daemon speaks.
pub const PROTOCOL_VERSION: u32 = 30;
/// Oldest protocol still accepted.
pub const MIN_PROTOCOL_VERSION: u32 = 29;

/// Extracts one `delimiter`-terminated token from `input`.
///
/// At most `limit` bytes (token plus delimiter) are considered; a buffer
/// that reaches the limit without a delimiter is an overrun attempt, not a
/// short read.
pub fn read_token(input: &[u8], delimiter: u8, limit: usize) -> Result<Decoded<&[u8]>, ProtocolError> {
    let window = &input[..input.len().min(limit)];
    match memchr(delimiter, window) {
        Some(at) => Ok(Decoded::Value(&input[..at], at + 1)),
        None if input.len() >= limit => Err(ProtocolError::BufferOverrun),
        None => Ok(Decoded::NeedMore),
    }
}

/// Parses the client's `@RSYNCD: <major>[.<minor>]` line (without the
/// trailing newline) into its version numbers.
pub fn parse_greeting(line: &[u8]) -> Result<(u32, Option<u32>), ProtocolError> {
    let line = match line.split_last() {
        Some((&b'\r', rest)) => rest,
        _ => line,
    };
    let text = std::str::from_utf8(line).map_err(|_| ProtocolError::MalformedHandshake)?;
    let version = text.strip_prefix("@RSYNCD: ").ok_or(ProtocolError::MalformedHandshake)?;

    let (major_text, minor_text) = match version.split_once('.') {
        Some((major, minor)) => (major, Some(minor)),
        None => (version, None),
    };
    let major: u32 = major_text.parse().map_err(|_| ProtocolError::MalformedHandshake)?;
    let minor = match minor_text {
        Some(text) => Some(text.parse().map_err(|_| ProtocolError::MalformedHandshake)?),
        None => None,
    };
    Ok((major, minor))
}

/// Picks the protocol version to run, or rejects the client.
///
/// Pre-release clients announce a protocol one above their stable base with
/// a non-zero minor; a client announcing exactly 30 must therefore carry
/// minor 0 or it is a beta this daemon cannot interoperate with. Anything
/// newer than 30 negotiates down to 30, anything below 29 is too old.
pub fn negotiate(major: u32, minor: Option<u32>) -> Result<u32, ProtocolError> {
    if major < MIN_PROTOCOL_VERSION {
        return Err(ProtocolError::AncientVersion);
    }
    if major == PROTOCOL_VERSION && minor != Some(0) {
        return Err(ProtocolError::IncompatibleBeta);
    }
    Ok(major.min(PROTOCOL_VERSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiate_line(line: &[u8]) -> Result<u32, ProtocolError> {
        let (major, minor) = parse_greeting(line)?;
        negotiate(major, minor)
    }

    #[test]
    fn current_protocol_negotiates_as_is() {
        assert_eq!(negotiate_line(b"@RSYNCD: 30.0"), Ok(30));
    }

    #[test]
    fn newer_clients_are_clamped() {
        assert_eq!(negotiate_line(b"@RSYNCD: 31.0"), Ok(30));
        assert_eq!(negotiate_line(b"@RSYNCD: 31"), Ok(30));
        assert_eq!(negotiate_line(b"@RSYNCD: 40.2"), Ok(30));
    }

    #[test]
    fn protocol_29_runs_without_a_minor() {
        assert_eq!(negotiate_line(b"@RSYNCD: 29"), Ok(29));
        assert_eq!(negotiate_line(b"@RSYNCD: 29.26"), Ok(29));
    }

    #[test]
    fn beta_protocol_30_is_rejected() {
        assert_eq!(negotiate_line(b"@RSYNCD: 30"), Err(ProtocolError::IncompatibleBeta));
        assert_eq!(negotiate_line(b"@RSYNCD: 30.1"), Err(ProtocolError::IncompatibleBeta));
    }

    #[test]
    fn pre_29_clients_are_too_old() {
        assert_eq!(negotiate_line(b"@RSYNCD: 28"), Err(ProtocolError::AncientVersion));
        assert_eq!(negotiate_line(b"@RSYNCD: 14"), Err(ProtocolError::AncientVersion));
    }

    #[test]
    fn garbage_greetings_are_malformed() {
        for line in [&b"RSYNCD: 30.0"[..], b"@RSYNCD: abc", b"@RSYNCD: 30.x", b"", b"@RSYNCD:30.0"] {
            assert_eq!(negotiate_line(line), Err(ProtocolError::MalformedHandshake));
        }
    }

    #[test]
    fn carriage_return_is_tolerated() {
        assert_eq!(negotiate_line(b"@RSYNCD: 30.0\r"), Ok(30));
    }

    #[test]
    fn token_reader_is_resumable() {
        assert_eq!(read_token(b"@RSYNCD: 3", b'\n', 16), Ok(Decoded::NeedMore));
        assert_eq!(
            read_token(b"@RSYNCD: 30.0\nrest", b'\n', 16),
            Ok(Decoded::Value(&b"@RSYNCD: 30.0"[..], 14))
        );
    }

    #[test]
    fn token_reader_caps_unterminated_lines() {
        assert_eq!(read_token(&[b'a'; 16], b'\n', 16), Err(ProtocolError::BufferOverrun));
    }
}
