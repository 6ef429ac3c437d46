//! Filesystem side of the daemon: loading repository trees into memory and
//! watching them for changes.
//!
//! A loaded [`TreeNode`] carries everything the cache layer needs to build
//! its wire representations, file bytes included; nothing here touches the
//! filesystem after a load returns. The watcher owns a debounced notify
//! subscription and forwards a unit tick over a crossbeam channel whenever
//! activity under the root settles, leaving rebuild scheduling to the
//! receiver.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use crossbeam_channel::Sender;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("filesystem watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// One loaded filesystem node.
///
/// `name` is the slash-separated path from the repository root with the
/// module name as its first component, the form the wire encoders expect.
/// Directory sizes are the directory entry's own on-disk size, matching
/// what a stat on the directory reports.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub name: String,
    pub size: i64,
    pub mtime: i64,
    pub is_dir: bool,
    pub data: Vec<u8>,
    pub children: Vec<TreeNode>,
}

/// Loads the module tree rooted at `root/<module>` into memory.
///
/// Children are visited in lexical name order. Symlinks are followed;
/// anything that is neither a regular file nor a directory after following
/// is skipped with a warning.
pub fn load_tree(root: &Path, module: &str) -> Result<TreeNode, RepositoryError> {
    let dir = root.join(module);
    let metadata = fs::metadata(&dir)?;
    load_node(&dir, module.to_owned(), &metadata)
}

fn load_node(path: &Path, name: String, metadata: &fs::Metadata) -> Result<TreeNode, RepositoryError> {
    let mtime = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64);
    let size = metadata.len() as i64;

    if !metadata.is_dir() {
        let data = fs::read(path)?;
        return Ok(TreeNode { name, size, mtime, is_dir: false, data, children: Vec::new() });
    }

    let mut entries: Vec<(String, fs::DirEntry)> = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        entries.push((entry.file_name().to_string_lossy().into_owned(), entry));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut children = Vec::with_capacity(entries.len());
    for (child_name, entry) in entries {
        let child_path = entry.path();
        // metadata() follows symlinks so a linked file serves like a copy.
        let child_metadata = match fs::metadata(&child_path) {
            Ok(metadata) if metadata.is_dir() || metadata.is_file() => metadata,
            Ok(_) => {
                warn!(path = %child_path.display(), "skipping special file");
                continue;
            }
            Err(error) => {
                warn!(path = %child_path.display(), %error, "skipping unreadable entry");
                continue;
            }
        };
        children.push(load_node(&child_path, format!("{name}/{child_name}"), &child_metadata)?);
    }

    Ok(TreeNode { name, size, mtime, is_dir: true, data: Vec::new(), children })
}

/// Lists the module names a repository root offers: its immediate
/// subdirectories, sorted.
pub fn discover_modules(root: &Path) -> Result<Vec<String>, RepositoryError> {
    let mut modules = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if fs::metadata(entry.path())?.is_dir() {
            modules.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    modules.sort();
    Ok(modules)
}

/// A live filesystem subscription; dropping it stops the watch.
pub struct Watcher {
    _debouncer: Debouncer<RecommendedWatcher>,
}

/// Watches `root` recursively and sends one tick per settled burst of
/// filesystem activity.
///
/// A full send buffer is fine: a rebuild is already pending and one tick
/// covers any number of changes.
pub fn watch(root: &Path, debounce: Duration, ticks: Sender<()>) -> Result<Watcher, RepositoryError> {
    let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| match result {
        Ok(events) => {
            if !events.is_empty() {
                debug!(events = events.len(), "repository changed");
                let _ = ticks.try_send(());
            }
        }
        Err(error) => warn!(%error, "filesystem watch error"),
    })?;
    debouncer.watcher().watch(root, RecursiveMode::Recursive)?;
    Ok(Watcher { _debouncer: debouncer })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;

    fn write_file(path: &Path, body: &[u8]) {
        let mut file = File::create(path).unwrap();
        file.write_all(body).unwrap();
    }

    fn fixture_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("ta");
        fs::create_dir(&module).unwrap();
        write_file(&module.join("root.cer"), b"certificate body");
        let sub = module.join("issued");
        fs::create_dir(&sub).unwrap();
        write_file(&sub.join("a.roa"), b"roa");
        write_file(&sub.join("b.mft"), b"manifest");
        dir
    }

    #[test]
    fn loads_a_tree_with_prefixed_names_and_file_bytes() {
        let repo = fixture_repo();
        let tree = load_tree(repo.path(), "ta").unwrap();

        assert_eq!(tree.name, "ta");
        assert!(tree.is_dir);
        assert_eq!(tree.children.len(), 2);

        let names: Vec<&str> = tree.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["ta/issued", "ta/root.cer"]);

        let cer = tree.children.iter().find(|c| !c.is_dir).unwrap();
        assert_eq!(cer.data, b"certificate body");
        assert_eq!(cer.size, 16);
        assert!(cer.mtime > 0);

        let issued = tree.children.iter().find(|c| c.is_dir).unwrap();
        let sub_names: Vec<&str> = issued.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(sub_names, ["ta/issued/a.roa", "ta/issued/b.mft"]);
    }

    #[test]
    fn missing_module_is_an_io_error() {
        let repo = fixture_repo();
        assert!(matches!(load_tree(repo.path(), "absent"), Err(RepositoryError::Io(_))));
    }

    #[test]
    fn discovers_top_level_directories_as_modules() {
        let repo = fixture_repo();
        fs::create_dir(repo.path().join("arin")).unwrap();
        write_file(&repo.path().join("stray.txt"), b"not a module");

        let modules = discover_modules(repo.path()).unwrap();
        assert_eq!(modules, ["arin", "ta"]);
    }

    #[test]
    fn watcher_ticks_on_changes() {
        let repo = fixture_repo();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let _watcher = watch(repo.path(), Duration::from_millis(50), tx).unwrap();

        write_file(&repo.path().join("ta").join("new.cer"), b"fresh");
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
