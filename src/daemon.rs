use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tardis_api::{ClientBuilder, Tardis, TardisError};
use tardis_fs::cache::MetadataCache;
use tardis_fs::catalog::{HelperLister, RemoteCatalog};
use tardis_fs::credentials::{self, ApiCredentials, CredentialError};
use tardis_fs::exchange::DescriptorExchange;
use tardis_fs::fs::fuser::{FuserAdapter, Ownership};
use tardis_fs::handles::HandleTable;
use tardis_fs::vfs::TardisFs;
use thiserror::Error;
use tokio::select;
use tracing::{debug, info, warn};

use crate::app_config;

/// How often idle datafile handles are looked for.
const SWEEP_PERIOD: Duration = Duration::from_secs(5);

/// Failures that stop the filesystem from coming up at all.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The API key helper failed and the configuration carries no key.
    #[error(
        "could not obtain a MyTardis API key: {0}\n\
         Check that `sudo -n -u <helper user> _myapikey` works for you, or set \
         [backend.credentials] in the configuration file."
    )]
    Credentials(#[from] CredentialError),

    /// The client could not be constructed from the configuration.
    #[error("could not set up the MyTardis client: {0}")]
    Client(#[from] TardisError),

    /// Mount point, runtime or FUSE session failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What the command line asked of the mount.
#[derive(Debug, Clone, Default)]
pub struct MountRequest {
    /// Where to mount.
    pub mount_point: PathBuf,
    /// Raw `-o` options, already split on commas.
    pub options: Vec<String>,
    /// Serve every callback from the thread that reads `/dev/fuse`'s replies.
    pub single_threaded: bool,
}

/// `-o` options, translated for fuser.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MountOptions {
    mount: Vec<fuser::MountOption>,
    direct_io: bool,
}

fn parse_mount_options(raw: &[String]) -> MountOptions {
    use fuser::MountOption;

    let mut mount = vec![
        MountOption::FSName("tardisfs".to_owned()),
        MountOption::Subtype("tardisfs".to_owned()),
        MountOption::RO,
        MountOption::NoDev,
        MountOption::NoSuid,
        MountOption::DefaultPermissions,
    ];
    let mut direct_io = false;

    for option in raw.iter().map(|o| o.trim()).filter(|o| !o.is_empty()) {
        let parsed = match option {
            // Per-open flag in FUSE, not a mount option.
            "direct_io" => {
                direct_io = true;
                continue;
            }
            "rw" => {
                warn!("ignoring 'rw': the filesystem is read-only");
                continue;
            }
            "ro" | "default_permissions" | "nodev" | "nosuid" => continue,
            "allow_other" => MountOption::AllowOther,
            "allow_root" => MountOption::AllowRoot,
            "auto_unmount" => MountOption::AutoUnmount,
            "exec" => MountOption::Exec,
            "noexec" => MountOption::NoExec,
            "atime" => MountOption::Atime,
            "noatime" => MountOption::NoAtime,
            "sync" => MountOption::Sync,
            "async" => MountOption::Async,
            "dirsync" => MountOption::DirSync,
            other => match other.split_once('=') {
                Some(("fsname", name)) => {
                    mount.retain(|o| !matches!(o, MountOption::FSName(_)));
                    MountOption::FSName(name.to_owned())
                }
                Some(("subtype", name)) => {
                    mount.retain(|o| !matches!(o, MountOption::Subtype(_)));
                    MountOption::Subtype(name.to_owned())
                }
                _ => MountOption::CUSTOM(other.to_owned()),
            },
        };
        if !mount.contains(&parsed) {
            mount.push(parsed);
        }
    }

    MountOptions { mount, direct_io }
}

mod managed_fuse {
    //! fuser only attempts a regular unmount when the `BackgroundSession` is dropped. A busy
    //! mount would then stay behind, so a lazy unmount is forced afterwards.
    use std::path::PathBuf;
    use std::time::Duration;

    use fuser::BackgroundSession;
    use nix::errno::Errno;
    use tardis_fs::fs::PathFs;
    use tardis_fs::fs::fuser::FuserAdapter;
    use tracing::{debug, error};

    use super::MountOptions;

    pub struct FuseCoreScope {
        _session: BackgroundSession,
    }

    pub struct ManagedFuse {
        mount_point: PathBuf,
    }

    impl ManagedFuse {
        pub fn new(mount_point: PathBuf) -> Self {
            Self { mount_point }
        }

        pub fn spawn<F: PathFs>(
            &self,
            adapter: FuserAdapter<F>,
            options: &MountOptions,
        ) -> Result<FuseCoreScope, std::io::Error> {
            let adapter = adapter.with_direct_io(options.direct_io);
            debug!(options = ?options.mount, "mounting");
            Ok(FuseCoreScope {
                _session: fuser::spawn_mount2(adapter, &self.mount_point, &options.mount)?,
            })
        }
    }

    impl Drop for ManagedFuse {
        fn drop(&mut self) {
            const UMOUNT_ATTEMPT_COUNT: usize = 10;
            const UMOUNT_ATTEMPT_DELAY: Duration = Duration::from_millis(10);

            debug!(mount_point = ?self.mount_point, "Confirming unmount of FUSE filesystem...");

            for i in 0..UMOUNT_ATTEMPT_COUNT {
                let result = {
                    #[cfg(target_os = "macos")]
                    {
                        nix::mount::unmount(&self.mount_point, nix::mount::MntFlags::MNT_FORCE)
                    }

                    #[cfg(target_os = "linux")]
                    {
                        nix::mount::umount2(&self.mount_point, nix::mount::MntFlags::MNT_DETACH)
                    }
                };

                match result {
                    Ok(()) => {
                        debug!("Unmounted FUSE filesystem on attempt {}", i + 1);
                        break;
                    }
                    Err(Errno::EBUSY) => {
                        debug!("FUSE filesystem still busy on attempt {}. Retrying...", i + 1);
                        std::thread::sleep(UMOUNT_ATTEMPT_DELAY);
                    }
                    Err(Errno::EINVAL | Errno::ENOENT) => {
                        debug!("FUSE filesystem already unmounted (attempt {})", i + 1);
                        break;
                    }
                    // Lazy unmount of a FUSE mount needs privileges we usually lack; fall back
                    // to the setuid helper.
                    Err(Errno::EPERM) => {
                        lazy_unmount_with_helper(&self.mount_point);
                        break;
                    }
                    Err(e) => {
                        error!("Failed to unmount FUSE filesystem on attempt {}: {}", i + 1, e);
                        break;
                    }
                }
            }
        }
    }

    fn lazy_unmount_with_helper(mount_point: &std::path::Path) {
        for helper in ["fusermount3", "fusermount"] {
            match std::process::Command::new(helper)
                .arg("-uz")
                .arg(mount_point)
                .stdin(std::process::Stdio::null())
                .status()
            {
                Ok(status) if status.success() => {
                    debug!(helper, "lazy unmount succeeded");
                    return;
                }
                Ok(status) => debug!(helper, %status, "lazy unmount failed"),
                Err(e) => debug!(helper, error = %e, "could not run unmount helper"),
            }
        }
        error!(mount_point = %mount_point.display(), "could not unmount; run `fusermount -uz` on it");
    }
}

/// Create the mount point if needed; refuse one that already has contents.
async fn prepare_mount_point(mount_point: &std::path::Path) -> Result<(), std::io::Error> {
    match tokio::fs::read_dir(mount_point).await {
        Ok(mut entries) => {
            if entries.next_entry().await?.is_some() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!(
                        "Mount point '{}' is not empty. If a previous mount is stale, run \
                         `fusermount -uz {}` first.",
                        mount_point.display(),
                        mount_point.display()
                    ),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(mount_point).await?;
            info!(path = %mount_point.display(), "Created mount point directory.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn wait_for_exit() -> Result<(), std::io::Error> {
    use tokio::signal;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sighup = signal::unix::signal(signal::unix::SignalKind::hangup())?;
    select! {
        _ = signal::ctrl_c() => {
            debug!("Received Ctrl+C signal, shutting down...");
        },
        _ = sigterm.recv() => {
            debug!("Received termination signal, shutting down...");
        },
        _ = sighup.recv() => {
            debug!("Received hangup signal, shutting down...");
        },
    }
    Ok(())
}

/// Use configured credentials, or ask the API key helper.
async fn credentials(config: &app_config::Config) -> Result<ApiCredentials, DaemonError> {
    if let Some(credentials) = &config.backend.credentials {
        debug!(username = %credentials.username, "using credentials from configuration");
        return Ok(credentials.clone());
    }
    let helpers = &config.helpers;
    Ok(credentials::fetch_api_key(
        &helpers.launcher(),
        &helpers.api_key_program,
        &helpers.install_dir,
        &helpers.auth_provider,
    )
    .await?)
}

/// Startup work that has to succeed while a terminal is still attached.
pub struct Prepared {
    client: Tardis,
}

/// Obtain credentials, build the client and ready the mount point.
///
/// Runs on its own short-lived runtime, which is gone by the time the caller daemonizes.
pub fn prepare(
    config: &app_config::Config,
    request: &MountRequest,
) -> Result<Prepared, DaemonError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let credentials = credentials(config).await?;
        let client = ClientBuilder::new(
            config.backend.url.clone(),
            credentials.username.clone(),
            credentials.api_key(),
        )
        .timeout(Duration::from_secs(config.backend.timeout_secs))
        .page_size(config.backend.page_size)
        .build()?;

        prepare_mount_point(&request.mount_point).await?;
        Ok(Prepared { client })
    })
}

/// Mount and serve until a shutdown signal arrives.
pub async fn run(
    config: app_config::Config,
    request: MountRequest,
    prepared: Prepared,
    handle: tokio::runtime::Handle,
) -> Result<(), DaemonError> {
    let Prepared { client } = prepared;
    let helpers = &config.helpers;
    let mut catalog = RemoteCatalog::new(client);
    if !helpers.use_api {
        catalog = catalog.with_helper(HelperLister::new(
            helpers.launcher(),
            helpers.datafiles_program.clone(),
            helpers.install_dir.clone(),
            helpers.auth_provider.clone(),
        ));
    }
    let cache = MetadataCache::new(
        catalog,
        config.cache.ttls(),
        config.cache.default_directory_size.as_u64(),
    );

    let exchange = DescriptorExchange::new(
        helpers.launcher(),
        helpers.resolver_program.clone(),
        helpers.resolver_config.clone(),
        helpers.auth_provider.clone(),
    )
    .socket_dir(config.exchange.socket_dir.clone())
    .poll_interval(Duration::from_millis(config.exchange.poll_interval_ms))
    .window(Duration::from_secs(config.exchange.timeout_secs));
    let handles = Arc::new(HandleTable::new(exchange));
    let sweeper = handles.spawn_sweeper(SWEEP_PERIOD);

    let tardis_fs = TardisFs::new(cache, handles);
    let adapter = FuserAdapter::new(
        tardis_fs,
        Ownership {
            uid: config.uid,
            gid: config.gid,
        },
        handle,
    );

    let options = parse_mount_options(&request.options);

    info!("Mounting MyTardis at {}.", request.mount_point.display());
    let fuse = managed_fuse::ManagedFuse::new(request.mount_point.clone());
    {
        let _session = fuse.spawn(adapter, &options)?;
        info!(
            "tardisfs is running. Press Ctrl+C or run `fusermount -uz {}` to stop.",
            request.mount_point.display()
        );

        wait_for_exit().await?;
    }
    sweeper.abort();
    Ok(())
}

/// Build the runtime and [`run`] on it.
pub fn spawn(
    config: app_config::Config,
    request: MountRequest,
    prepared: Prepared,
) -> Result<(), DaemonError> {
    let runtime = if request.single_threaded {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
    } else {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
    };
    runtime.block_on(run(config, request, prepared, runtime.handle().clone()))
}

#[cfg(test)]
mod tests {
    use fuser::MountOption;

    use super::*;

    fn raw(options: &[&str]) -> Vec<String> {
        options.iter().map(|o| (*o).to_owned()).collect()
    }

    #[test]
    fn defaults_are_read_only() {
        let parsed = parse_mount_options(&[]);
        assert!(parsed.mount.contains(&MountOption::RO));
        assert!(parsed.mount.contains(&MountOption::DefaultPermissions));
        assert!(!parsed.direct_io);
    }

    #[test]
    fn direct_io_is_taken_out_of_the_mount_options() {
        let parsed = parse_mount_options(&raw(&["direct_io", "allow_other"]));
        assert!(parsed.direct_io);
        assert!(parsed.mount.contains(&MountOption::AllowOther));
        assert!(
            !parsed
                .mount
                .iter()
                .any(|o| matches!(o, MountOption::CUSTOM(c) if c == "direct_io"))
        );
    }

    #[test]
    fn rw_is_ignored_and_unknown_options_pass_through() {
        let parsed = parse_mount_options(&raw(&["rw", "max_read=131072", "fsname=mytardis"]));
        assert!(parsed.mount.contains(&MountOption::RO));
        assert!(!parsed.mount.contains(&MountOption::RW));
        assert!(
            parsed
                .mount
                .contains(&MountOption::CUSTOM("max_read=131072".to_owned()))
        );
        let fsnames: Vec<_> = parsed
            .mount
            .iter()
            .filter(|o| matches!(o, MountOption::FSName(_)))
            .collect();
        assert_eq!(fsnames, vec![&MountOption::FSName("mytardis".to_owned())]);
    }

    fn local_config() -> app_config::Config {
        let mut config = app_config::Config::default();
        config.helpers.user = String::new();
        config
    }

    fn request_at(mount_point: PathBuf) -> MountRequest {
        MountRequest {
            mount_point,
            ..MountRequest::default()
        }
    }

    #[test]
    fn failing_key_helper_stops_startup_before_the_mount_point_is_touched() {
        let mut config = local_config();
        config.helpers.api_key_program = "false".to_owned();
        let dir = tempfile::tempdir().unwrap();
        let request = request_at(dir.path().join("MyTardis"));

        let err = prepare(&config, &request).err().unwrap();

        assert!(
            matches!(err, DaemonError::Credentials(CredentialError::Failed { .. })),
            "{err:?}"
        );
        assert!(err.to_string().contains("_myapikey"), "{err}");
        assert!(!request.mount_point.exists());
    }

    #[test]
    fn occupied_mount_point_is_refused() {
        let mut config = local_config();
        config.backend.credentials = credentials::parse_api_key_line("ApiKey alice:s3cret");
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("leftover"), b"").unwrap();

        let err = prepare(&config, &request_at(dir.path().to_owned()))
            .err()
            .unwrap();

        assert!(
            matches!(err, DaemonError::Io(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists),
            "{err:?}"
        );
        assert!(err.to_string().contains("fusermount -uz"), "{err}");
    }

    #[test]
    fn missing_mount_point_is_created() {
        let mut config = local_config();
        config.backend.credentials = credentials::parse_api_key_line("ApiKey alice:s3cret");
        let dir = tempfile::tempdir().unwrap();
        let request = request_at(dir.path().join("MyTardis"));

        assert!(prepare(&config, &request).is_ok());
        assert!(request.mount_point.is_dir());
    }
}
