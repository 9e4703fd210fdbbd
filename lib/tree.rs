//! The path-keyed directory tree served by the filesystem.
//!
//! Entries are only ever added or overwritten; nothing is removed while the process runs.
//! Each directory keeps an index of its immediate children so a listing costs
//! O(children) rather than a scan of the whole tree.

use std::collections::BTreeSet;
use std::time::SystemTime;

use tracing::trace;

use crate::timestamps::process_start;

/// Path of the root directory.
pub const ROOT: &str = "/";

/// What a [`DirEntry`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A directory: the root, an experiment, a dataset or a subdirectory inside one.
    Directory,
    /// A datafile, readable through the descriptor exchange.
    File {
        /// Backend id of the datafile.
        datafile_id: u64,
    },
}

/// Access, modification and creation times of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryTimes {
    /// Last access.
    pub accessed: SystemTime,
    /// Last modification.
    pub modified: SystemTime,
    /// Creation.
    pub created: SystemTime,
}

impl EntryTimes {
    /// All three times set to `t`.
    #[must_use]
    pub fn uniform(t: SystemTime) -> Self {
        Self {
            accessed: t,
            modified: t,
            created: t,
        }
    }

    /// Times for an entry we know nothing about.
    #[must_use]
    pub fn unknown() -> Self {
        Self::uniform(process_start())
    }
}

/// One file or directory in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Absolute, slash-separated path. Unique key within the tree.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// File or directory.
    pub kind: EntryKind,
    /// Timestamps.
    pub times: EntryTimes,
    /// Hard link count: `2 + immediate children` for directories, 1 for files.
    pub link_count: u32,
}

impl DirEntry {
    /// A directory entry. Link count is filled in by the tree on read.
    #[must_use]
    pub fn directory(path: impl Into<String>, size: u64, times: EntryTimes) -> Self {
        Self {
            path: path.into(),
            size,
            kind: EntryKind::Directory,
            times,
            link_count: 2,
        }
    }

    /// A file entry backed by datafile `datafile_id`.
    #[must_use]
    pub fn file(path: impl Into<String>, size: u64, datafile_id: u64, times: EntryTimes) -> Self {
        Self {
            path: path.into(),
            size,
            kind: EntryKind::File { datafile_id },
            times,
            link_count: 1,
        }
    }

    /// Whether this entry is a directory.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    /// The last path component. Empty for the root.
    #[must_use]
    pub fn name(&self) -> &str {
        file_name(&self.path)
    }
}

/// Normalize a path handed to us by the kernel or a caller.
///
/// Strips trailing `*` and trailing `/` (except on the root) and makes sure the path is
/// absolute.
#[must_use]
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('*').trim_end_matches('/');
    if trimmed.is_empty() {
        return ROOT.to_owned();
    }
    if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

/// Parent of a normalized path. `None` for the root.
#[must_use]
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last component of a normalized path. Empty for the root.
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}

/// Number of components in a normalized path. The root has depth 0.
#[must_use]
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|part| !part.is_empty()).count()
}

/// Append `name` to a normalized directory path.
#[must_use]
pub fn join(dir: &str, name: &str) -> String {
    if dir == ROOT {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Concurrent path → entry map plus a per-directory child index.
pub struct Tree {
    entries: scc::HashMap<String, DirEntry>,
    children: scc::HashMap<String, BTreeSet<String>>,
    directory_size: u64,
}

impl Tree {
    /// Create a tree holding only the root directory.
    #[must_use]
    pub fn new(directory_size: u64) -> Self {
        let tree = Self {
            entries: scc::HashMap::new(),
            children: scc::HashMap::new(),
            directory_size,
        };
        let _ = tree.entries.insert_sync(
            ROOT.to_owned(),
            DirEntry::directory(ROOT, directory_size, EntryTimes::unknown()),
        );
        tree
    }

    /// The size reported for every directory.
    #[must_use]
    pub fn directory_size(&self) -> u64 {
        self.directory_size
    }

    /// Number of entries, including the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether only the root exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Whether `path` exists.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_sync(path)
    }

    /// Look up an entry by normalized path, with its link count filled in.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<DirEntry> {
        let mut entry = self.entries.read_sync(path, |_, e| e.clone())?;
        if entry.is_directory() {
            entry.link_count = 2u32.saturating_add(self.child_count(path));
        }
        Some(entry)
    }

    fn child_count(&self, path: &str) -> u32 {
        self.children
            .read_sync(path, |_, names| u32::try_from(names.len()).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }

    /// Insert or overwrite an entry and register it with its parent.
    ///
    /// The parent itself is not created; callers materialize ancestors first.
    pub fn upsert(&self, entry: DirEntry) {
        let path = entry.path.clone();
        trace!(path = %path, "upserting tree entry");
        self.entries.upsert_sync(path.clone(), entry);

        let Some(parent) = parent(&path) else {
            return;
        };
        let name = file_name(&path).to_owned();
        self.children
            .entry_sync(parent.to_owned())
            .or_default()
            .get_mut()
            .insert(name);
    }

    /// Insert a directory at `path` with the default directory size.
    pub fn upsert_directory(&self, path: &str, times: EntryTimes) {
        self.upsert(DirEntry::directory(path, self.directory_size, times));
    }

    /// Overwrite the root's timestamps.
    pub fn set_root_times(&self, times: EntryTimes) {
        self.entries.update_sync(ROOT, |_, root| root.times = times);
    }

    /// Immediate children of `path`, ordered by name.
    #[must_use]
    pub fn children(&self, path: &str) -> Vec<DirEntry> {
        let names = self
            .children
            .read_sync(path, |_, names| names.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        names
            .iter()
            .filter_map(|name| self.get(&join(path, name)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    #[test]
    fn normalize_strips_wildcards_and_trailing_slashes() {
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/*"), "/");
        assert_eq!(normalize("/73-Run/"), "/73-Run");
        assert_eq!(normalize("/73-Run/*"), "/73-Run");
        assert_eq!(normalize("73-Run"), "/73-Run");
    }

    #[test]
    fn path_helpers() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/a/b/c"), Some("/a/b"));
        assert_eq!(file_name("/a/b/c"), "c");
        assert_eq!(file_name("/"), "");
        assert_eq!(depth("/"), 0);
        assert_eq!(depth("/a/b/c"), 3);
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn root_always_exists() {
        let tree = Tree::new(4096);
        let root = tree.get("/").unwrap();
        assert!(root.is_directory());
        assert_eq!(root.size, 4096);
        assert_eq!(root.link_count, 2, "empty root has nlink 2");
        assert!(tree.is_empty());
    }

    #[test]
    fn link_counts_track_children() {
        let tree = Tree::new(4096);
        tree.upsert_directory("/1-a", EntryTimes::unknown());
        tree.upsert_directory("/2-b", EntryTimes::unknown());
        tree.upsert(DirEntry::file("/1-a/f", 10, 3, EntryTimes::unknown()));

        assert_eq!(tree.get("/").unwrap().link_count, 4);
        assert_eq!(tree.get("/1-a").unwrap().link_count, 3);
        assert_eq!(tree.get("/2-b").unwrap().link_count, 2);
        assert_eq!(tree.get("/1-a/f").unwrap().link_count, 1);
    }

    #[test]
    fn children_are_exact_immediate_children() {
        let tree = Tree::new(4096);
        tree.upsert_directory("/1-a", EntryTimes::unknown());
        tree.upsert_directory("/1-ab", EntryTimes::unknown());
        tree.upsert_directory("/1-a/x", EntryTimes::unknown());
        tree.upsert(DirEntry::file("/1-a/x/deep", 1, 1, EntryTimes::unknown()));

        let names: Vec<String> = tree
            .children("/1-a")
            .iter()
            .map(|e| e.name().to_owned())
            .collect();
        assert_eq!(names, vec!["x"], "siblings sharing a prefix must not leak in");
        assert!(tree.children("/nope").is_empty());
    }

    #[test]
    fn upsert_is_last_write_wins() {
        let tree = Tree::new(4096);
        tree.upsert_directory("/1-a", EntryTimes::unknown());
        tree.upsert(DirEntry::file("/1-a/f", 10, 3, EntryTimes::unknown()));
        tree.upsert(DirEntry::file("/1-a/f", 20, 4, EntryTimes::unknown()));

        let f = tree.get("/1-a/f").unwrap();
        assert_eq!(f.size, 20);
        assert_eq!(f.kind, EntryKind::File { datafile_id: 4 });
        assert_eq!(tree.children("/1-a").len(), 1);
    }

    #[test]
    fn root_times_can_be_replaced() {
        let tree = Tree::new(4096);
        let t = UNIX_EPOCH + Duration::from_secs(1_000);
        tree.set_root_times(EntryTimes::uniform(t));
        assert_eq!(tree.get("/").unwrap().times.modified, t);
    }
}
