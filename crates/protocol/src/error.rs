//! Protocol-level error taxonomy.
//!
//! Every variant here is a condition the peer caused (or a hard wire-format
//! violation); the session renders the `Display` text to the client as an
//! `@ERROR:` line or a multiplexed error frame and then terminates.
//! Incomplete input is deliberately *not* represented here — resumable
//! decoders signal it through [`crate::Decoded::NeedMore`] instead.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("version handshake failure")]
    MalformedHandshake,

    #[error("client is speaking an incompatible beta of protocol 30")]
    IncompatibleBeta,

    #[error("client is an ancient version, try to upgrade it")]
    AncientVersion,

    /// A delimited token exceeded its size cap without a delimiter in sight.
    #[error("buffer overrun attempt")]
    BufferOverrun,

    #[error("argument list too long")]
    TooManyArguments,

    #[error("Unknown module '{0}'")]
    UnknownModule(String),

    /// Options outside the allow-list, named verbatim as the client sent them.
    #[error("unsupported options: {0}")]
    UnsupportedOptions(String),

    #[error("option {0} requires a value")]
    MissingOptionValue(String),

    #[error("invalid checksum seed")]
    InvalidChecksumSeed,

    #[error("module is read only")]
    ReadOnlyModule,

    #[error("incremental recursion is required")]
    IncrementalRecursionRequired,

    #[error("filters are unsupported by this server")]
    FiltersUnsupported,

    #[error("requesting multiple paths is not supported")]
    MultiplePaths,

    #[error("no path specified")]
    NoPathSpecified,

    #[error("no such path")]
    NoSuchPath,

    #[error("unexpected multiplex message tag {0}")]
    UnexpectedMultiplexTag(u8),

    #[error("overflow decoding variable-length integer")]
    VarintOverflow,

    /// A generator request named a negative index that is not a sentinel.
    #[error("invalid file index {0}")]
    InvalidIndex(i32),

    /// A transfer request's index fell outside every outstanding file list.
    #[error("file-list index {index} not in 0 - {max}")]
    IndexOutOfRange { index: i32, max: i32 },

    #[error("attempting to send over-long vstring")]
    OverlongVstring,
}
