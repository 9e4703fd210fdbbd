//! FUSE adapter: maps [`fuser::Filesystem`] callbacks to a [`PathFs`].

use std::ffi::OsStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, error, instrument};

use super::bridge::InodeBridge;
use super::{InodePerms, Listed, OpenFlags, PathFs};
use crate::tree::{self, DirEntry};
use crate::vfs::FsError;

const BLOCK_SIZE: u32 = 4096;
const MAX_NAME_LENGTH: u32 = 255;

/// Owner of everything in the mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    /// Reported uid.
    pub uid: u32,
    /// Reported gid.
    pub gid: u32,
}

fn to_fuser_attr(ino: u64, entry: &DirEntry, owner: Ownership) -> fuser::FileAttr {
    let (kind, perm) = if entry.is_directory() {
        (fuser::FileType::Directory, InodePerms::DIRECTORY)
    } else {
        (fuser::FileType::RegularFile, InodePerms::FILE)
    };
    fuser::FileAttr {
        ino,
        size: entry.size,
        blocks: entry.size.div_ceil(512),
        atime: entry.times.accessed,
        mtime: entry.times.modified,
        ctime: entry.times.modified,
        crtime: entry.times.created,
        kind,
        perm: perm.bits(),
        nlink: entry.link_count,
        uid: owner.uid,
        gid: owner.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

fn file_type(entry: &DirEntry) -> fuser::FileType {
    if entry.is_directory() {
        fuser::FileType::Directory
    } else {
        fuser::FileType::RegularFile
    }
}

/// Bridges a [`PathFs`] to the [`fuser::Filesystem`] trait.
///
/// Every callback resolves its inode to a path, then runs on the tokio runtime so a slow
/// backend call only holds up the request that made it.
pub struct FuserAdapter<F: PathFs> {
    fs: Arc<F>,
    bridge: Arc<InodeBridge>,
    owner: Ownership,
    next_fh: AtomicU64,
    open_flags: u32,
    runtime: tokio::runtime::Handle,
}

impl<F: PathFs> FuserAdapter<F> {
    // The tree refreshes on a TTL of its own, so there is no point letting the kernel cache
    // attributes for long.
    const ATTR_TTL: Duration = Duration::from_secs(1);

    /// Serve `fs` with everything owned by `owner`.
    pub fn new(fs: F, owner: Ownership, runtime: tokio::runtime::Handle) -> Self {
        Self {
            fs: Arc::new(fs),
            bridge: Arc::new(InodeBridge::new()),
            owner,
            next_fh: AtomicU64::new(1),
            open_flags: 0,
            runtime,
        }
    }

    /// Ask the kernel to bypass its page cache for every opened file.
    #[must_use]
    pub fn with_direct_io(mut self, direct_io: bool) -> Self {
        if direct_io {
            self.open_flags |= fuser::consts::FOPEN_DIRECT_IO;
        } else {
            self.open_flags &= !fuser::consts::FOPEN_DIRECT_IO;
        }
        self
    }

    fn path_of(&self, ino: u64) -> Result<String, FsError> {
        self.bridge
            .path(ino)
            .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))
    }
}

impl<F: PathFs> fuser::Filesystem for FuserAdapter<F> {
    #[instrument(name = "FuserAdapter::lookup", skip(self, _req, reply))]
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let parent_path = match self.path_of(parent) {
            Ok(path) => path,
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.into());
                return;
            }
        };
        let Some(name) = name.to_str() else {
            debug!("non-UTF-8 name cannot exist here");
            reply.error(libc::ENOENT);
            return;
        };

        let path = tree::join(&parent_path, name);
        let fs = Arc::clone(&self.fs);
        let bridge = Arc::clone(&self.bridge);
        let owner = self.owner;
        let ttl = Self::ATTR_TTL;
        self.runtime.spawn(async move {
            match fs.attributes(&path).await {
                Ok(entry) => {
                    let attr = to_fuser_attr(bridge.inode(&entry.path), &entry, owner);
                    debug!(?attr, "replying...");
                    reply.entry(&ttl, &attr, 0);
                }
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::getattr", skip(self, _req, _fh, reply))]
    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(e) => {
                reply.error(e.into());
                return;
            }
        };
        let fs = Arc::clone(&self.fs);
        let owner = self.owner;
        let ttl = Self::ATTR_TTL;
        self.runtime.spawn(async move {
            match fs.attributes(&path).await {
                Ok(entry) => {
                    let attr = to_fuser_attr(ino, &entry, owner);
                    debug!(?attr, "replying...");
                    reply.attr(&ttl, &attr);
                }
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::readdir", skip(self, _req, _fh, offset, reply))]
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(e) => {
                reply.error(e.into());
                return;
            }
        };
        let fs = Arc::clone(&self.fs);
        let bridge = Arc::clone(&self.bridge);
        self.runtime.spawn(async move {
            let entries: Vec<Listed> = match fs.list_directory(&path).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                    return;
                }
            };

            #[expect(
                clippy::cast_possible_truncation,
                reason = "fuser offset is i64 but always non-negative"
            )]
            for (i, listed) in entries
                .iter()
                .enumerate()
                .skip(offset.cast_unsigned() as usize)
            {
                let entry_ino = if listed.name == "." {
                    ino
                } else {
                    bridge.inode(&listed.entry.path)
                };
                let Ok(idx): Result<i64, _> = (i + 1).try_into() else {
                    error!("Directory entry index {} too large for fuser", i + 1);
                    reply.error(libc::EIO);
                    return;
                };

                if reply.add(entry_ino, idx, file_type(&listed.entry), &listed.name) {
                    debug!("buffer full for now, stopping readdir");
                    break;
                }
            }

            debug!("finalizing reply...");
            reply.ok();
        });
    }

    #[instrument(name = "FuserAdapter::open", skip(self, _req, flags, reply))]
    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        if OpenFlags::from(flags).wants_write() {
            debug!("write access requested; replying EROFS");
            reply.error(FsError::ReadOnly.into());
            return;
        }
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(e) => {
                reply.error(e.into());
                return;
            }
        };
        let fs = Arc::clone(&self.fs);
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        let open_flags = self.open_flags;
        self.runtime.spawn(async move {
            match fs.attributes(&path).await {
                Ok(entry) if entry.is_directory() => {
                    reply.error(FsError::IsADirectory(entry.path).into());
                }
                Ok(_) => {
                    debug!(handle = fh, "replying...");
                    reply.opened(fh, open_flags);
                }
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(
        name = "FuserAdapter::read",
        skip(self, _req, _fh, offset, size, _flags, _lock_owner, reply)
    )]
    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(e) => {
                reply.error(e.into());
                return;
            }
        };
        let fs = Arc::clone(&self.fs);
        self.runtime.spawn(async move {
            match fs.read(&path, size, offset.cast_unsigned()).await {
                Ok(data) => {
                    debug!(read_bytes = data.len(), "replying...");
                    reply.data(&data);
                }
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(
        name = "FuserAdapter::release",
        skip(self, _req, _ino, _flags, _lock_owner, _flush, reply)
    )]
    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        // Descriptors outlive kernel handles; the idle sweep closes them.
        reply.ok();
    }

    #[instrument(name = "FuserAdapter::statfs", skip(self, _req, _ino, reply))]
    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let stats = self.fs.statfs();
        debug!(?stats, "replying...");
        reply.statfs(0, 0, 0, stats.entries, 0, BLOCK_SIZE, MAX_NAME_LENGTH, BLOCK_SIZE);
    }
}
