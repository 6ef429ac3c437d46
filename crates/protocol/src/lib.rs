//! rsync v30 daemon-dialect wire codecs and the sender-side session.
//!
//! The crate is transport-free: [`Session`] consumes raw socket bytes via
//! [`Session::receive`] and queues its responses internally; the owner pumps
//! [`Session::take_output`] back to the peer. Every decoder in this crate is
//! resumable — a buffer that does not yet hold a complete encoding yields
//! [`Decoded::NeedMore`] rather than an error, so a partially received frame
//! or token is simply retried when more bytes arrive.

pub mod error;
pub mod flist;
pub mod generator;
pub mod handshake;
pub mod module;
pub mod multiplex;
pub mod ndx;
pub mod options;
pub mod session;
pub mod varint;

pub use error::ProtocolError;
pub use generator::{ChecksumHeader, TransferAttributes};
pub use module::{FileEntry, FileKind, FileList, Module, NoSuchPath};
pub use ndx::{NDX_DONE, NDX_FLIST_EOF, NDX_FLIST_OFFSET, NdxState};
pub use options::SessionOptions;
pub use session::Session;

/// Outcome of a resumable decode attempt over a byte slice.
///
/// `NeedMore` is not an error: the caller keeps the input buffered and
/// retries once more bytes have arrived. `Value` carries the decoded value
/// and the number of input bytes it consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    Value(T, usize),
    NeedMore,
}
