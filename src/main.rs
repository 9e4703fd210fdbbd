//! Mount a MyTardis server's experiments, datasets and datafiles as a read-only filesystem.
use std::path::PathBuf;

use clap::Parser;
use tardis_fs::trc::{LogLevel, Trc};
use tracing::{debug, error};

mod app_config;
mod daemon;
mod fuse_check;

use crate::app_config::{Config, ConfigError};
use crate::daemon::MountRequest;

const LONG_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("VERGEN_GIT_SHA"), ")");

#[derive(Parser)]
#[command(
    version,
    long_version = LONG_VERSION,
    about = "Read-only filesystem view of MyTardis experiments, datasets and datafiles."
)]
struct Args {
    /// Directory to mount on. Created if it does not exist.
    mount_point: PathBuf,

    /// Mount options, comma separated. May be given more than once.
    #[arg(short = 'o', value_name = "OPT[,OPT...]", value_delimiter = ',')]
    options: Vec<String>,

    /// Stay in the foreground.
    #[arg(short = 'f', long)]
    foreground: bool,

    /// Log everything; implies -f.
    #[arg(short = 'd', long)]
    debug: bool,

    /// Handle one request at a time.
    #[arg(short = 's', long)]
    single_threaded: bool,

    /// Log verbosity. DEBUG implies -f.
    #[arg(short = 'l', long = "loglevel", value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Optional path to a tardisfs config TOML.
    #[arg(short, long, value_parser)]
    config: Option<PathBuf>,
}

impl Args {
    fn log_level(&self) -> LogLevel {
        if self.debug {
            LogLevel::Debug
        } else {
            self.log_level
        }
    }

    fn foreground(&self) -> bool {
        self.foreground || self.log_level() == LogLevel::Debug
    }
}

fn parse_args() -> Args {
    Args::try_parse().unwrap_or_else(|e| {
        // --help and --version are not usage errors.
        let code = i32::from(e.use_stderr());
        let _ = e.print();
        std::process::exit(code);
    })
}

fn load_config(path: Option<&std::path::Path>) -> Config {
    // Tracing isn't initialized yet.
    Config::load(path).unwrap_or_else(|e| {
        match e {
            ConfigError::ValidationErrors(messages) => {
                eprintln!("Configuration is invalid.");
                for msg in &messages {
                    eprintln!(" - {msg}");
                }
            }
            other => eprintln!("Failed to load configuration: {other}"),
        }
        std::process::exit(1);
    })
}

fn daemonize(config: &Config) -> Result<(), String> {
    for path in [&config.daemon.pid_file, &config.daemon.log_file] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
        }
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.daemon.log_file)
        .map_err(|e| format!("Failed to open log file: {e}"))?;
    let log_clone = log_file
        .try_clone()
        .map_err(|e| format!("Failed to clone log file handle: {e}"))?;

    daemonize::Daemonize::new()
        .pid_file(&config.daemon.pid_file)
        .stdout(log_file)
        .stderr(log_clone)
        .start()
        .map_err(|e| format!("Failed to spawn the daemon: {e}"))
}

/// Main entry point for the application.
fn main() {
    let args = parse_args();
    let config = load_config(args.config.as_deref());
    let foreground = args.foreground();

    let trc = Trc::with_level(args.log_level());
    let trc = if foreground { trc } else { trc.daemon() };
    if let Err(e) = trc.init() {
        eprintln!(
            "Failed to initialize logging. Without logging, we can't provide any useful error \
             messages, so we have to exit: {e}"
        );
        std::process::exit(1);
    }

    if let Err(e) = fuse_check::ensure_fuse() {
        error!("{e}");
        std::process::exit(1);
    }

    // Daemonizing changes directory to /.
    let mount_point = match std::path::absolute(&args.mount_point) {
        Ok(path) => path,
        Err(e) => {
            error!("Invalid mount point {}: {e}", args.mount_point.display());
            std::process::exit(1);
        }
    };
    let request = MountRequest {
        mount_point,
        options: args.options,
        single_threaded: args.single_threaded,
    };

    // Anything that can fail for want of credentials or a usable mount point fails here,
    // while the exit status and the message still reach the terminal.
    let prepared = match daemon::prepare(&config, &request) {
        Ok(prepared) => prepared,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    if !foreground {
        debug!(config = ?config, "Daemonizing with configuration...");
        if let Err(e) = daemonize(&config) {
            error!("{e}");
            std::process::exit(1);
        }
    }

    if let Err(e) = daemon::spawn(config, request, prepared) {
        error!("{e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_split_on_commas_and_accumulate() {
        let args =
            Args::try_parse_from(["tardisfs", "/mnt/t", "-o", "direct_io,allow_other", "-o", "ro"])
                .unwrap();
        assert_eq!(args.options, vec!["direct_io", "allow_other", "ro"]);
        assert!(!args.foreground());
    }

    #[test]
    fn debug_forces_foreground() {
        let args = Args::try_parse_from(["tardisfs", "/mnt/t", "-d"]).unwrap();
        assert!(args.foreground());
        assert_eq!(args.log_level(), LogLevel::Debug);

        let args = Args::try_parse_from(["tardisfs", "/mnt/t", "--loglevel", "DEBUG"]).unwrap();
        assert!(args.foreground());
    }

    #[test]
    fn mount_point_is_required() {
        assert!(Args::try_parse_from(["tardisfs"]).is_err());
        assert!(Args::try_parse_from(["tardisfs", "/mnt/t", "-l", "LOUD"]).is_err());
    }
}
