//! In-memory module cache.
//!
//! Each served module keeps a [`Snapshot`]: its whole tree converted into
//! [`protocol::FileEntry`] values with transfer framing precomputed, plus a
//! map from every addressable path to its ready-made file-list block
//! sequences. Serving a request is a map lookup and buffer writes; nothing
//! is encoded or compressed on the connection path.
//!
//! Snapshots are immutable and published through an `RwLock<Arc<_>>` swap,
//! so rebuilds never stall readers and a session keeps the tree it started
//! with for its whole lifetime.

pub mod compress;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use md5::{Digest, Md5};
use tracing::info;

use protocol::flist;
use protocol::module::{FileContent, FileEntry, FileKind, FileList, Module, NoSuchPath};
use repository::TreeNode;

pub use compress::CompressError;

/// Raw file data is cut into chunks of this size, each with a 4-byte
/// little-endian length prefix.
const RAW_CHUNK: usize = 32_768;
/// Deflated data is cut into chunks of this size, each with a 2-byte
/// tagged length prefix.
const COMPRESSED_CHUNK: usize = 16_383;

/// Block sequences for one addressable path, both recursion variants.
struct PathLists {
    recursive: Vec<Arc<FileList>>,
    flat: Vec<Arc<FileList>>,
}

/// One immutable, fully precomputed rendition of a module tree.
struct Snapshot {
    paths: HashMap<String, PathLists>,
    files: usize,
    bytes: u64,
}

impl Snapshot {
    fn empty() -> Self {
        Self { paths: HashMap::new(), files: 0, bytes: 0 }
    }
}

/// A named module serving from its latest snapshot.
pub struct CachedModule {
    name: String,
    description: String,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl CachedModule {
    /// Creates the module with an empty snapshot; every lookup fails until
    /// the first [`CachedModule::rebuild`].
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
        }
    }

    /// Converts a loaded tree into a fresh snapshot and publishes it.
    pub fn rebuild(&self, tree: &TreeNode) -> Result<(), CompressError> {
        let mut files = 0;
        let mut bytes = 0;
        let root = convert(tree, &mut files, &mut bytes)?;

        let mut paths = HashMap::new();
        index(&root, &mut paths);
        let snapshot = Arc::new(Snapshot { paths, files, bytes });

        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
        info!(module = %self.name, files, bytes, "snapshot published");
        Ok(())
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of regular files in the published snapshot.
    pub fn file_count(&self) -> usize {
        self.current().files
    }
}

impl Module for CachedModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn file_lists(&self, path: &str, recursive: bool) -> Result<Vec<Arc<FileList>>, NoSuchPath> {
        let snapshot = self.current();
        // The bare module name addresses the module's own top directory,
        // not an entry under some parent.
        let lists = if path == self.name {
            snapshot.paths.get(&format!("{path}/"))
        } else {
            snapshot.paths.get(path)
        }
        .ok_or(NoSuchPath)?;
        Ok(if recursive { lists.recursive.clone() } else { lists.flat.clone() })
    }
}

/// Builds the wire-ready entry for one tree node, depth first.
fn convert(node: &TreeNode, files: &mut usize, bytes: &mut u64) -> Result<Arc<FileEntry>, CompressError> {
    let (kind, content) = if node.is_dir {
        (FileKind::Directory, None)
    } else {
        *files += 1;
        *bytes += node.data.len() as u64;
        let checksum: [u8; 16] = Md5::digest(&node.data).into();
        let deflated = compress::deflate(&node.data)?;
        (
            FileKind::File,
            Some(FileContent {
                checksum,
                framed_raw: frame_raw(&node.data, &checksum).into(),
                framed_compressed: frame_compressed(&deflated, &checksum).into(),
            }),
        )
    };

    let mut children = Vec::with_capacity(node.children.len());
    for child in &node.children {
        children.push(convert(child, files, bytes)?);
    }

    Ok(Arc::new(FileEntry {
        name: node.name.clone(),
        size: node.size,
        mtime: node.mtime,
        kind,
        content,
        children,
    }))
}

/// Registers the list sequences for `entry` and everything below it.
///
/// A path without a trailing slash is addressed from its parent; a
/// directory path with one is addressed from itself.
fn index(entry: &Arc<FileEntry>, paths: &mut HashMap<String, PathLists>) {
    paths.insert(
        entry.name.clone(),
        PathLists {
            recursive: flist::build_from_parent(entry, true),
            flat: flist::build_from_parent(entry, false),
        },
    );
    if entry.is_directory() {
        paths.insert(
            format!("{}/", entry.name),
            PathLists {
                recursive: flist::build_from_itself(entry, true),
                flat: flist::build_from_itself(entry, false),
            },
        );
        for child in &entry.children {
            index(child, paths);
        }
    }
}

/// Length-prefixed 32 KiB chunks, a zero-length terminator, then the
/// whole-file digest.
fn frame_raw(data: &[u8], checksum: &[u8; 16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + (data.len() / RAW_CHUNK + 2) * 4 + 16);
    for chunk in data.chunks(RAW_CHUNK) {
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(chunk);
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(checksum);
    out
}

/// Tagged 16383-byte chunks of the deflated stream, a one-byte terminator,
/// then the whole-file digest.
fn frame_compressed(deflated: &[u8], checksum: &[u8; 16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(deflated.len() + (deflated.len() / COMPRESSED_CHUNK + 2) * 2 + 17);
    for chunk in deflated.chunks(COMPRESSED_CHUNK) {
        out.push(0x40 | (chunk.len() >> 8) as u8);
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
    out.push(0x00);
    out.extend_from_slice(checksum);
    out
}
