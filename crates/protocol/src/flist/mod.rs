//! File-list block encoding and incremental-recursion chunking.
//!
//! A transfer's file list is sent as a sequence of blocks: the first block
//! lists the requested root one level deep, and each subsequent block
//! expands one directory encountered earlier, breadth-first. Index
//! numbering is continuous across blocks. Entry encoding compresses
//! against the previous entry within a block (shared name prefix, repeated
//! mtime or mode); state resets at every block boundary.
//!
//! Receivers depend on the ordering rule to pair directory placeholders
//! with their expansion blocks: within a directory all regular files sort
//! before all subdirectories, each group lexically, and a "." root entry
//! sorts before everything.

pub mod flags;

use std::cmp::Ordering;
use std::sync::Arc;

use crate::module::{FileEntry, FileList};
use crate::varint::{encode_varint, encode_varlong};
use flags::{
    XMIT_EXTENDED_FLAGS, XMIT_LONG_NAME, XMIT_NO_CONTENT_DIR, XMIT_SAME_GID, XMIT_SAME_MODE,
    XMIT_SAME_NAME, XMIT_SAME_TIME, XMIT_SAME_UID, XMIT_TOP_DIR,
};

/// Permissions are not modeled; every directory claims 0o40775.
const DIRECTORY_MODE: u32 = 0o40_775;
/// Every regular file claims 0o100664.
const FILE_MODE: u32 = 0o100_664;

/// Files before directories, lexical within each group.
pub fn rsync_order(a: &Arc<FileEntry>, b: &Arc<FileEntry>) -> Ordering {
    match (a.is_directory(), b.is_directory()) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => a.name.cmp(&b.name),
    }
}

/// Builds the block sequence for a path requested with a trailing slash:
/// the root is emitted as "." and names are relative to the root itself.
pub fn build_from_itself(root: &Arc<FileEntry>, recursive: bool) -> Vec<Arc<FileList>> {
    build(root, root.name.len() + 1, true, recursive)
}

/// Builds the block sequence for a path requested without a trailing
/// slash: the root is emitted under its own basename, relative to its
/// parent directory.
pub fn build_from_parent(root: &Arc<FileEntry>, recursive: bool) -> Vec<Arc<FileList>> {
    let strip = root.name.len() - root.basename().len();
    build(root, strip, false, recursive)
}

fn build(root: &Arc<FileEntry>, strip: usize, as_dot: bool, recursive: bool) -> Vec<Arc<FileList>> {
    let mut lists = Vec::new();
    let mut pending: Vec<Arc<FileEntry>> = Vec::new();
    let mut next_index = 0i32;

    // First block: the root itself, expanded one level when it is a
    // directory being addressed from itself.
    {
        let mut encoder = BlockEncoder::new(strip);
        let mut entries = Vec::new();

        encoder.push(root, as_dot, as_dot, !recursive && !as_dot);
        entries.push(Arc::clone(root));

        if root.is_directory() && as_dot {
            let mut children = root.children.clone();
            children.sort_by(rsync_order);
            for child in children {
                encoder.push(&child, false, false, !recursive && child.is_directory());
                if recursive && child.is_directory() {
                    pending.push(Arc::clone(&child));
                }
                entries.push(child);
            }
        } else if root.is_directory() && recursive {
            pending.push(Arc::clone(root));
        }

        let count = entries.len() as i32;
        lists.push(Arc::new(FileList::new(next_index, entries, Arc::clone(root), encoder.finish())));
        next_index += count;
    }

    // Expansion blocks, one per directory, breadth-first.
    let mut cursor = 0usize;
    while cursor < pending.len() {
        let dir = Arc::clone(&pending[cursor]);
        cursor += 1;

        let mut encoder = BlockEncoder::new(strip);
        let mut entries = Vec::new();
        let mut children = dir.children.clone();
        children.sort_by(rsync_order);
        for child in children {
            encoder.push(&child, false, false, false);
            if child.is_directory() {
                pending.push(Arc::clone(&child));
            }
            entries.push(child);
        }

        let count = entries.len() as i32;
        lists.push(Arc::new(FileList::new(next_index, entries, dir, encoder.finish())));
        next_index += count;
    }

    lists
}

/// Encodes the entries of one file-list block.
struct BlockEncoder {
    strip: usize,
    out: Vec<u8>,
    last_name: Vec<u8>,
    last: Option<(bool, i64)>,
}

impl BlockEncoder {
    fn new(strip: usize) -> Self {
        Self { strip, out: Vec::new(), last_name: Vec::new(), last: None }
    }

    fn push(&mut self, entry: &Arc<FileEntry>, as_dot: bool, top_dir: bool, no_content: bool) {
        let name: &[u8] = if as_dot { b"." } else { entry.name.as_bytes().get(self.strip..).unwrap_or(b".") };

        let mut flags = XMIT_SAME_UID | XMIT_SAME_GID;
        if top_dir && entry.is_directory() {
            flags |= XMIT_TOP_DIR;
        }
        if no_content && entry.is_directory() {
            flags |= XMIT_NO_CONTENT_DIR | XMIT_EXTENDED_FLAGS;
        }

        let mut prefix = 0usize;
        if let Some((last_dir, last_mtime)) = self.last {
            prefix = common_prefix(&self.last_name, name).min(255);
            if prefix > 0 {
                flags |= XMIT_SAME_NAME;
            }
            if last_dir == entry.is_directory() {
                flags |= XMIT_SAME_MODE;
            }
            if last_mtime == entry.mtime {
                flags |= XMIT_SAME_TIME;
            }
        }

        let suffix = &name[prefix..];
        if suffix.len() > 255 {
            flags |= XMIT_LONG_NAME;
        }

        self.out.push(flags as u8);
        if flags & XMIT_EXTENDED_FLAGS != 0 {
            self.out.push((flags >> 8) as u8);
        }

        if flags & XMIT_SAME_NAME != 0 {
            self.out.push(prefix as u8);
        }
        if flags & XMIT_LONG_NAME != 0 {
            encode_varint(suffix.len() as i32, &mut self.out);
        } else {
            self.out.push(suffix.len() as u8);
        }
        self.out.extend_from_slice(suffix);

        encode_varlong(entry.size, 3, &mut self.out);
        if flags & XMIT_SAME_TIME == 0 {
            encode_varlong(entry.mtime, 4, &mut self.out);
        }
        if flags & XMIT_SAME_MODE == 0 {
            let mode = if entry.is_directory() { DIRECTORY_MODE } else { FILE_MODE };
            self.out.extend_from_slice(&mode.to_le_bytes());
        }

        self.last_name = name.to_vec();
        self.last = Some((entry.is_directory(), entry.mtime));
    }

    /// Terminates the block with its zero byte and yields the wire bytes.
    fn finish(mut self) -> Vec<u8> {
        self.out.push(0);
        self.out
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}
