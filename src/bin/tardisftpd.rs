//! `tardisftpd`: mount MyTardis under `~/MyTardis` for an SFTP session and say how to undo it.

use std::fs::File;
use std::io::IsTerminal as _;
use std::os::unix::process::CommandExt as _;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use clap::Parser;
use tardis_fs::trc::{LogLevel, Trc};
use tracing::{debug, error};

const MOUNT_DIR: &str = "MyTardis";
const LOG_FILE: &str = "tardisftpd.log";
const ERROR_LOG_FILE: &str = "tardisftpd-error.log";
const MOUNT_POLL_ATTEMPTS: u32 = 50;
const MOUNT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(version, about = "Mount MyTardis at ~/MyTardis in the background.")]
struct Args {
    /// The tardisfs binary. Defaults to the one installed next to this program.
    #[arg(long, value_name = "PATH")]
    tardisfs: Option<PathBuf>,

    /// Log verbosity of this launcher (not of the mount).
    #[arg(short = 'l', long = "loglevel", value_enum, default_value_t = LogLevel::Warning)]
    log_level: LogLevel,
}

fn tardisfs_program(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("tardisfs")))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from("tardisfs"))
}

#[cfg(target_os = "linux")]
fn is_fuse_mount(path: &Path) -> bool {
    use nix::sys::statfs::{FUSE_SUPER_MAGIC, statfs};
    statfs(path).is_ok_and(|fs| fs.filesystem_type() == FUSE_SUPER_MAGIC)
}

#[cfg(not(target_os = "linux"))]
fn is_fuse_mount(path: &Path) -> bool {
    // Without a magic number to compare, a mount shows up as a device change.
    use std::os::unix::fs::MetadataExt as _;
    match (path.metadata(), path.parent().map(Path::metadata)) {
        (Ok(mount), Some(Ok(parent))) => mount.dev() != parent.dev(),
        _ => false,
    }
}

fn spawn_mount(program: &Path, mount_point: &Path, home: &Path) -> std::io::Result<Child> {
    let stdout = File::create(home.join(LOG_FILE))?;
    let stderr = File::create(home.join(ERROR_LOG_FILE))?;
    debug!(program = %program.display(), mount_point = %mount_point.display(), "starting mount");
    Command::new(program)
        .arg(mount_point)
        .args(["-f", "-o", "direct_io"])
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        // Outlive this session's terminal.
        .process_group(0)
        .spawn()
}

/// Wait for the mount to appear. Gives up early if the mount process exits.
fn wait_for_mount(child: &mut Child, mount_point: &Path) -> bool {
    for attempt in 0..MOUNT_POLL_ATTEMPTS {
        if is_fuse_mount(mount_point) {
            debug!(attempt, "mount is up");
            return true;
        }
        match child.try_wait() {
            Ok(Some(status)) => {
                error!(%status, "tardisfs exited before mounting");
                return false;
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "could not poll tardisfs"),
        }
        std::thread::sleep(MOUNT_POLL_INTERVAL);
    }
    is_fuse_mount(mount_point)
}

fn main() {
    let args = Args::try_parse().unwrap_or_else(|e| {
        let code = i32::from(e.use_stderr());
        let _ = e.print();
        std::process::exit(code);
    });
    if let Err(e) = Trc::with_level(args.log_level).init() {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let Some(home) = dirs::home_dir() else {
        error!("Cannot determine your home directory.");
        std::process::exit(1);
    };
    let mount_point = home.join(MOUNT_DIR);

    if is_fuse_mount(&mount_point) {
        println!("MyTardis is already mounted at ~/{MOUNT_DIR}.");
        return;
    }

    let program = tardisfs_program(args.tardisfs);
    let mut child = match spawn_mount(&program, &mount_point, &home) {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to start {}: {e}", program.display());
            std::process::exit(1);
        }
    };

    if wait_for_mount(&mut child, &mount_point) {
        if std::io::stdout().is_terminal() {
            println!("MyTardis is mounted at ~/{MOUNT_DIR}.");
            println!("When you are finished, unmount it with:");
            println!();
            println!("    fusermount -uz ~/{MOUNT_DIR}");
        }
    } else {
        eprintln!("Mounting MyTardis at ~/{MOUNT_DIR} failed.");
        eprintln!("For details, run:");
        eprintln!();
        eprintln!("    tail $HOME/{ERROR_LOG_FILE}");
        eprintln!();
        eprintln!(
            "If ~/{MOUNT_DIR} is left over from an earlier session, run \
             `fusermount -uz ~/{MOUNT_DIR}` and try again."
        );
        std::process::exit(1);
    }
}
