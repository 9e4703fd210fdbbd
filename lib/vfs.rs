//! The path-based filesystem served over FUSE.
//!
//! Metadata comes from the [`MetadataCache`]; file contents come through the [`HandleTable`].

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::cache::MetadataCache;
use crate::catalog::Catalog;
use crate::exchange::{DescriptorSource, ExchangeError};
use crate::fs::{FsStats, Listed, PathFs};
use crate::handles::{HandleError, HandleKey, HandleTable, HandleTarget};
use crate::naming;
use crate::tree::{self, DirEntry, EntryKind, ROOT};

/// Filesystem-level failures, each mapping to one errno.
#[derive(Debug, Error)]
pub enum FsError {
    /// No such path.
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// A directory operation on a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A file operation on a directory.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Write access requested.
    #[error("read-only filesystem")]
    ReadOnly,

    /// The resolver refused access.
    #[error("access denied: {0}")]
    AuthDenied(String),

    /// The resolver did not answer in time.
    #[error("timed out obtaining a descriptor")]
    ProtocolTimeout,

    /// Anything else.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<FsError> for i32 {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::ReadOnly => libc::EROFS,
            FsError::AuthDenied(_) => libc::EACCES,
            FsError::ProtocolTimeout => libc::ETIMEDOUT,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<HandleError> for FsError {
    fn from(e: HandleError) -> Self {
        match e {
            HandleError::Open(ExchangeError::Denied { message }) => Self::AuthDenied(message),
            HandleError::Open(ExchangeError::ProtocolTimeout { .. }) => Self::ProtocolTimeout,
            HandleError::Open(ExchangeError::Io(e)) | HandleError::Read(e) => Self::Io(e),
            HandleError::Open(other) => Self::Io(io::Error::other(other)),
        }
    }
}

/// The MyTardis hierarchy as a read-only filesystem.
pub struct TardisFs<C: Catalog, S: DescriptorSource> {
    cache: MetadataCache<C>,
    handles: Arc<HandleTable<S>>,
}

impl<C: Catalog, S: DescriptorSource> TardisFs<C, S> {
    /// Serve `cache`, reading files through `handles`.
    #[must_use]
    pub fn new(cache: MetadataCache<C>, handles: Arc<HandleTable<S>>) -> Self {
        Self { cache, handles }
    }

    /// The metadata cache.
    #[must_use]
    pub fn cache(&self) -> &MetadataCache<C> {
        &self.cache
    }

    /// The handle table.
    #[must_use]
    pub fn handles(&self) -> &Arc<HandleTable<S>> {
        &self.handles
    }

    /// Attributes of `path`. A miss refreshes the scopes above it once before giving up.
    #[instrument(name = "TardisFs::attributes", skip(self))]
    pub async fn attributes(&self, path: &str) -> Result<DirEntry, FsError> {
        let path = tree::normalize(path);
        if let Some(entry) = self.cache.tree().get(&path) {
            return Ok(entry);
        }

        self.cache.refresh_along(&path).await;
        self.cache
            .tree()
            .get(&path)
            .ok_or(FsError::NotFound(path))
    }

    /// `.` and `..`, then every immediate child of `path`.
    #[instrument(name = "TardisFs::list_directory", skip(self))]
    pub async fn list_directory(&self, path: &str) -> Result<Vec<Listed>, FsError> {
        let this = self.attributes(path).await?;
        if !this.is_directory() {
            return Err(FsError::NotADirectory(this.path));
        }

        self.cache.refresh_for(&this.path).await;

        let parent_path = tree::parent(&this.path).unwrap_or(ROOT);
        let parent = self
            .cache
            .tree()
            .get(parent_path)
            .unwrap_or_else(|| this.clone());

        let children = self.cache.tree().children(&this.path);
        let mut listing = Vec::with_capacity(children.len() + 2);
        listing.push(Listed {
            name: ".".to_owned(),
            entry: this,
        });
        listing.push(Listed {
            name: "..".to_owned(),
            entry: parent,
        });
        listing.extend(children.into_iter().map(|entry| Listed {
            name: entry.name().to_owned(),
            entry,
        }));
        Ok(listing)
    }

    /// Read up to `length` bytes at `offset`. Short only at end of file.
    #[instrument(name = "TardisFs::read", skip(self))]
    pub async fn read(&self, path: &str, length: u32, offset: u64) -> Result<Bytes, FsError> {
        let entry = self.attributes(path).await?;
        let EntryKind::File { datafile_id } = entry.kind else {
            return Err(FsError::IsADirectory(entry.path));
        };
        let target = handle_target(&entry.path, datafile_id)
            .ok_or_else(|| FsError::NotFound(entry.path.clone()))?;

        let data = self
            .handles
            .read(&target, offset, length as usize)
            .await
            .map_err(|e| {
                warn!(error = %e, path = %entry.path, "read failed");
                FsError::from(e)
            })?;
        debug!(bytes = data.len(), "read served");
        Ok(data)
    }
}

/// Split `/{exp}/{dataset}/{sub/dirs}/{file}` into the handle it is read through.
pub(crate) fn handle_target(path: &str, datafile_id: u64) -> Option<HandleTarget> {
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let [experiment, dataset, rest @ ..] = components.as_slice() else {
        return None;
    };
    let (filename, subdirectory) = rest.split_last()?;

    Some(HandleTarget {
        key: HandleKey {
            dataset_id: naming::parse_entry_id(dataset)?,
            subdirectory: subdirectory.join("/"),
            filename: (*filename).to_owned(),
        },
        experiment_id: naming::parse_entry_id(experiment)?,
        datafile_id,
    })
}

impl<C: Catalog, S: DescriptorSource> PathFs for TardisFs<C, S> {
    async fn attributes(&self, path: &str) -> Result<DirEntry, FsError> {
        TardisFs::attributes(self, path).await
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<Listed>, FsError> {
        TardisFs::list_directory(self, path).await
    }

    async fn read(&self, path: &str, length: u32, offset: u64) -> Result<Bytes, FsError> {
        TardisFs::read(self, path, length, offset).await
    }

    fn statfs(&self) -> FsStats {
        FsStats {
            entries: self.cache.tree().len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decomposes_file_paths() {
        let target = handle_target("/73-Beamline_Run/5-Run_1/raw/2014/scan.dat", 9).unwrap();
        assert_eq!(target.experiment_id, 73);
        assert_eq!(target.datafile_id, 9);
        assert_eq!(target.key.dataset_id, 5);
        assert_eq!(target.key.subdirectory, "raw/2014");
        assert_eq!(target.key.filename, "scan.dat");

        let top = handle_target("/73-Beamline_Run/5-Run_1/scan.dat", 9).unwrap();
        assert_eq!(top.key.subdirectory, "");
    }

    #[test]
    fn shallow_paths_have_no_handle() {
        assert!(handle_target("/73-Beamline_Run/5-Run_1", 9).is_none());
        assert!(handle_target("/73-Beamline_Run", 9).is_none());
        assert!(handle_target("/x-y/5-Run_1/scan.dat", 9).is_none());
    }

    #[test]
    fn errors_map_to_errno() {
        assert_eq!(i32::from(FsError::NotFound("/x".into())), libc::ENOENT);
        assert_eq!(i32::from(FsError::AuthDenied("no".into())), libc::EACCES);
        assert_eq!(i32::from(FsError::ProtocolTimeout), libc::ETIMEDOUT);
        assert_eq!(i32::from(FsError::ReadOnly), libc::EROFS);
        assert_eq!(
            i32::from(FsError::Io(io::Error::other("boom"))),
            libc::EIO
        );
    }
}
