//! Bidirectional inode ↔ path mapping.
//!
//! Entries are never removed during a session, so an inode handed to the kernel stays valid
//! for as long as the mount exists.

use std::sync::atomic::{AtomicU64, Ordering};

use bimap::BiMap;
use parking_lot::RwLock;

use super::{InodeAddr, ROOT_INODE};
use crate::tree::ROOT;

/// Allocates inode numbers for paths and resolves them back.
pub struct InodeBridge {
    map: RwLock<BiMap<InodeAddr, String>>,
    next: AtomicU64,
}

impl InodeBridge {
    /// A bridge knowing only the root.
    #[must_use]
    pub fn new() -> Self {
        let mut map = BiMap::new();
        map.insert(ROOT_INODE, ROOT.to_owned());
        Self {
            map: RwLock::new(map),
            next: AtomicU64::new(ROOT_INODE + 1),
        }
    }

    /// Path of `ino`, if it was ever handed out.
    #[must_use]
    pub fn path(&self, ino: InodeAddr) -> Option<String> {
        self.map.read().get_by_left(&ino).cloned()
    }

    /// Inode of `path`, allocating one on first sight.
    pub fn inode(&self, path: &str) -> InodeAddr {
        if let Some(&ino) = self.map.read().get_by_right(path) {
            return ino;
        }

        let mut map = self.map.write();
        if let Some(&ino) = map.get_by_right(path) {
            return ino;
        }
        let ino = self.next.fetch_add(1, Ordering::Relaxed);
        map.insert(ino, path.to_owned());
        ino
    }

    /// Number of known inodes, including the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Whether only the root is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

impl Default for InodeBridge {
    fn default() -> Self {
        Self::new()
    }
}
