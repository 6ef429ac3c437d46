//! Transmit flags for file-list entries.
//!
//! The low byte travels as-is; when any extended bit is needed the
//! [`XMIT_EXTENDED_FLAGS`] bit is set and a second byte carries
//! `flags >> 8`. The `SAME_UID`/`SAME_GID` bits are always set because
//! ownership is never transmitted, which conveniently keeps the low byte
//! non-zero as the wire format requires.

/// Entry is the requested transfer root.
pub const XMIT_TOP_DIR: u16 = 1 << 0;
/// Mode field omitted; previous entry's mode applies.
pub const XMIT_SAME_MODE: u16 = 1 << 1;
/// A second flags byte follows.
pub const XMIT_EXTENDED_FLAGS: u16 = 1 << 2;
pub const XMIT_SAME_UID: u16 = 1 << 3;
pub const XMIT_SAME_GID: u16 = 1 << 4;
/// Name shares a prefix with the previous entry; prefix length byte follows.
pub const XMIT_SAME_NAME: u16 = 1 << 5;
/// Name suffix longer than 255 bytes; length is varint-encoded.
pub const XMIT_LONG_NAME: u16 = 1 << 6;
/// Mtime field omitted; previous entry's mtime applies.
pub const XMIT_SAME_TIME: u16 = 1 << 7;

/// Directory listed without its contents (non-recursive listing).
pub const XMIT_NO_CONTENT_DIR: u16 = 1 << 8;
