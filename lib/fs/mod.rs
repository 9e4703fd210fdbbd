//! Kernel-facing plumbing.
/// Inode ↔ path mapping.
pub mod bridge;
/// FUSE adapter: maps [`fuser::Filesystem`] callbacks to a [`PathFs`].
pub mod fuser;

use std::future::Future;

use bitflags::bitflags;
use bytes::Bytes;

use crate::tree::DirEntry;
use crate::vfs::FsError;

/// Type representing an inode identifier.
pub type InodeAddr = u64;

/// Inode of the mount root.
pub const ROOT_INODE: InodeAddr = 1;

bitflags! {
    /// Permission bits for an inode, similar to Unix file permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InodePerms: u16 {
        /// Other: execute permission.
        const OTHER_EXECUTE = 1 << 0;
        /// Other: read permission.
        const OTHER_READ    = 1 << 2;
        /// Group: execute permission.
        const GROUP_EXECUTE = 1 << 3;
        /// Group: read permission.
        const GROUP_READ    = 1 << 5;
        /// Owner: execute permission.
        const OWNER_EXECUTE = 1 << 6;
        /// Owner: read permission.
        const OWNER_READ    = 1 << 8;

        /// What every directory gets: the mounting user may list and enter it.
        const DIRECTORY = Self::OWNER_READ.bits() | Self::OWNER_EXECUTE.bits();
        /// What every file gets: the mounting user may read it.
        const FILE = Self::OWNER_READ.bits();
    }
}

bitflags! {
    /// The access-mode part of open(2) flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: i32 {
        /// Open for writing only.
        const WRONLY = libc::O_WRONLY;
        /// Open for reading and writing.
        const RDWR = libc::O_RDWR;
        /// Append on each write.
        const APPEND = libc::O_APPEND;
        /// Truncate to zero length.
        const TRUNC = libc::O_TRUNC;
        /// Create file if it does not exist.
        const CREAT = libc::O_CREAT;
    }
}

impl OpenFlags {
    /// Whether these flags ask for any kind of write access.
    #[must_use]
    pub fn wants_write(self) -> bool {
        self.intersects(Self::WRONLY | Self::RDWR | Self::APPEND | Self::TRUNC | Self::CREAT)
    }
}

impl From<i32> for OpenFlags {
    fn from(val: i32) -> Self {
        Self::from_bits_truncate(val)
    }
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listed {
    /// Name within the listed directory, including `.` and `..`.
    pub name: String,
    /// The entry the name refers to.
    pub entry: DirEntry,
}

/// Filesystem-wide figures for statfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    /// Entries known so far.
    pub entries: u64,
}

/// A read-only filesystem addressed by path.
pub trait PathFs: Send + Sync + 'static {
    /// Attributes of one path.
    fn attributes(&self, path: &str) -> impl Future<Output = Result<DirEntry, FsError>> + Send;

    /// Entries of a directory, `.` and `..` first.
    fn list_directory(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Vec<Listed>, FsError>> + Send;

    /// Up to `length` bytes of a file at `offset`.
    fn read(
        &self,
        path: &str,
        length: u32,
        offset: u64,
    ) -> impl Future<Output = Result<Bytes, FsError>> + Send;

    /// Filesystem-wide figures.
    fn statfs(&self) -> FsStats;
}
