//! The file data model the session serves from.
//!
//! A [`Module`] is a named, addressable tree of [`FileEntry`] values with
//! precomputed wire content. The production implementation lives in the
//! cache crate; the session only ever sees this interface, so tests can
//! substitute small hand-built modules.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Requested path does not exist in the module's current snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no such path")]
pub struct NoSuchPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// Precomputed wire content for one regular file.
///
/// Both buffers are fully framed for the transfer response: the raw form in
/// 32 KiB chunks with 4-byte length prefixes and a 4-byte zero terminator,
/// the compressed form in 16383-byte chunks with 2-byte tagged prefixes and
/// a single zero terminator, each followed by the 16-byte MD5 digest.
#[derive(Clone)]
pub struct FileContent {
    pub checksum: [u8; 16],
    pub framed_raw: Arc<[u8]>,
    pub framed_compressed: Arc<[u8]>,
}

/// One node of a module's cached tree.
///
/// `name` is the full path from the repository root, with the module name
/// as its leading component; list encoders derive the transmitted relative
/// names from it. Entries are immutable and shared between every file list
/// that references them.
pub struct FileEntry {
    pub name: String,
    pub size: i64,
    pub mtime: i64,
    pub kind: FileKind,
    pub content: Option<FileContent>,
    pub children: Vec<Arc<FileEntry>>,
}

impl FileEntry {
    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Final path component.
    pub fn basename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("kind", &self.kind)
            .field("children", &self.children.len())
            .finish()
    }
}

/// One incremental-recursion block: a pre-encoded wire buffer plus the
/// parallel entry table it describes.
///
/// `first_index` is the global index of entry 0 within the transfer's
/// numbering space; the block's root directory answers for index
/// `first_index - 1` without being counted among the entries.
pub struct FileList {
    first_index: i32,
    entries: Vec<Arc<FileEntry>>,
    root: Arc<FileEntry>,
    wire: Vec<u8>,
}

impl FileList {
    pub fn new(first_index: i32, entries: Vec<Arc<FileEntry>>, root: Arc<FileEntry>, wire: Vec<u8>) -> Self {
        Self { first_index, entries, root, wire }
    }

    /// Number of entries counted by this block.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_index(&self) -> i32 {
        self.first_index
    }

    /// Pre-encoded wire block, including the zero terminator byte.
    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    pub fn root(&self) -> &Arc<FileEntry> {
        &self.root
    }

    /// True when `ndx` falls within this block's index range, counting the
    /// root at `first_index - 1`.
    pub fn covers(&self, ndx: i32) -> bool {
        ndx >= self.first_index - 1 && ndx < self.first_index + self.entries.len() as i32
    }

    /// Resolves a global index against this block.
    pub fn entry(&self, ndx: i32) -> Option<&Arc<FileEntry>> {
        if !self.covers(ndx) {
            return None;
        }
        if ndx < self.first_index {
            Some(&self.root)
        } else {
            self.entries.get((ndx - self.first_index) as usize)
        }
    }
}

impl fmt::Debug for FileList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileList")
            .field("first_index", &self.first_index)
            .field("entries", &self.entries.len())
            .field("root", &self.root.name)
            .field("wire_len", &self.wire.len())
            .finish()
    }
}

/// A named set of files offered for transfer.
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// File-list blocks for `path` (full path, module name included).
    ///
    /// Recursive lookups return the complete incremental chunk sequence;
    /// non-recursive lookups return a single one-level block whose
    /// directory entries carry the no-content marker.
    fn file_lists(&self, path: &str, recursive: bool) -> Result<Vec<Arc<FileList>>, NoSuchPath>;
}
