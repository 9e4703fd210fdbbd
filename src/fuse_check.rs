//! FUSE availability checks.

use std::path::{Path, PathBuf};

const FUSE_DEVICE: &str = "/dev/fuse";
const MOUNT_HELPERS: [&str; 2] = ["fusermount3", "fusermount"];

/// Errors that can occur when verifying FUSE availability.
#[derive(Debug, thiserror::Error)]
pub enum FuseCheckError {
    /// The kernel module is not loaded, or the device node is missing.
    #[error(
        "{FUSE_DEVICE} does not exist. tardisfs needs the FUSE kernel module.\n\
         Try: sudo modprobe fuse"
    )]
    DeviceMissing,

    /// The device exists but we may not open it.
    #[error(
        "{FUSE_DEVICE} is not accessible to this user.\n\
         Ask an administrator to add you to the 'fuse' group, then log in again."
    )]
    DeviceInaccessible,

    /// No setuid mount helper on PATH.
    #[error(
        "Neither fusermount3 nor fusermount was found on PATH.\n\
         Install your distribution's fuse3 (or fuse) package."
    )]
    MountHelperMissing,
}

fn find_on_path(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Verify that FUSE is installed and usable by the current user.
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    let device = Path::new(FUSE_DEVICE);
    if !device.exists() {
        return Err(FuseCheckError::DeviceMissing);
    }
    if nix::unistd::access(device, nix::unistd::AccessFlags::R_OK | nix::unistd::AccessFlags::W_OK)
        .is_err()
    {
        return Err(FuseCheckError::DeviceInaccessible);
    }
    if !MOUNT_HELPERS.iter().any(|helper| find_on_path(helper).is_some()) {
        return Err(FuseCheckError::MountHelperMissing);
    }
    Ok(())
}
