//! Module for application configuration settings.
//!
//! User configurations may be specified in a configuration file. Every field has a default,
//! so a missing file means a stock MyTardis deployment on this host.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};
use tardis_fs::cache::CacheTtls;
use tardis_fs::credentials::ApiCredentials;
use tardis_fs::launcher::Launcher;
use thiserror::Error;
use tracing::debug;

fn tardisfs_runtime_dir() -> Option<PathBuf> {
    if let Some(path) = dirs::runtime_dir() {
        return Some(path.join("tardisfs"));
    }
    dirs::home_dir().map(|home| home.join(".local").join("share").join("tardisfs"))
}

fn default_pid_file() -> PathBuf {
    tardisfs_runtime_dir().map_or_else(
        || PathBuf::from("/tmp/tardisfs.pid"),
        |rd| rd.join("tardisfs.pid"),
    )
}

fn default_log_file() -> PathBuf {
    tardisfs_runtime_dir().map_or_else(
        || PathBuf::from("/tmp/tardisfs.log"),
        |rd| rd.join("tardisfs.log"),
    )
}

fn current_uid() -> u32 {
    nix::unistd::Uid::current().as_raw()
}

fn current_gid() -> u32 {
    nix::unistd::Gid::current().as_raw()
}

/// Where the backend lives and how we authenticate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BackendConfig {
    /// Base URL of the MyTardis server.
    pub url: String,

    /// Static credentials. When absent, the API key helper is asked at startup.
    #[serde(default)]
    pub credentials: Option<ApiCredentials>,

    /// Per-request HTTP timeout, in seconds.
    pub timeout_secs: u64,

    /// Objects requested per page.
    pub page_size: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_owned(),
            credentials: None,
            timeout_secs: 30,
            page_size: 100,
        }
    }
}

/// The privileged helper programs installed alongside MyTardis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HelpersConfig {
    /// Account the helpers run as via `sudo -n -u`. Empty runs them directly.
    pub user: String,

    /// MyTardis installation directory, passed to every helper.
    pub install_dir: PathBuf,

    /// Authentication method OS usernames are matched under.
    pub auth_provider: String,

    /// Prints `ApiKey <user>:<key>` for the calling user.
    pub api_key_program: String,

    /// Prints a dataset's datafiles.
    pub datafiles_program: String,

    /// Hands out file descriptors.
    pub resolver_program: String,

    /// Configuration file the resolver reads.
    pub resolver_config: PathBuf,

    /// List datafiles through the REST API instead of the listing helper.
    pub use_api: bool,
}

impl HelpersConfig {
    /// How helper programs are started.
    #[must_use]
    pub fn launcher(&self) -> Launcher {
        if self.user.trim().is_empty() {
            Launcher::direct()
        } else {
            Launcher::sudo(self.user.trim())
        }
    }
}

impl Default for HelpersConfig {
    fn default() -> Self {
        Self {
            user: "mytardis".to_owned(),
            install_dir: PathBuf::from("/opt/mytardis/current"),
            auth_provider: "localdb".to_owned(),
            api_key_program: "_myapikey".to_owned(),
            datafiles_program: "_datasetdatafiles".to_owned(),
            resolver_program: "_datafiledescriptord".to_owned(),
            resolver_config: PathBuf::from("/etc/tardisfs/resolver.toml"),
            use_api: false,
        }
    }
}

/// Metadata cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheConfig {
    /// Seconds the experiment list stays fresh.
    pub experiments_ttl_secs: u64,

    /// Seconds each dataset list stays fresh.
    pub datasets_ttl_secs: u64,

    /// Seconds each datafile list stays fresh.
    pub datafiles_ttl_secs: u64,

    /// Size reported for every directory.
    pub default_directory_size: ByteSize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            experiments_ttl_secs: 30,
            datasets_ttl_secs: 30,
            datafiles_ttl_secs: 30,
            default_directory_size: ByteSize::b(4096),
        }
    }
}

impl CacheConfig {
    /// The TTLs as durations.
    #[must_use]
    pub fn ttls(&self) -> CacheTtls {
        CacheTtls {
            experiments: Duration::from_secs(self.experiments_ttl_secs),
            datasets: Duration::from_secs(self.datasets_ttl_secs),
            datafiles: Duration::from_secs(self.datafiles_ttl_secs),
        }
    }
}

/// Descriptor exchange settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ExchangeConfig {
    /// Milliseconds between attempts to reach the resolver.
    pub poll_interval_ms: u64,

    /// Seconds to wait for the resolver's reply before failing the read.
    pub timeout_secs: u64,

    /// Where rendezvous sockets are created. Must be writable by the helper account.
    pub socket_dir: PathBuf,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            timeout_secs: 10,
            socket_dir: std::env::temp_dir(),
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DaemonConfig {
    /// The path to the PID file for the daemon.
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Where a backgrounded mount writes its logs.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log_file: default_log_file(),
        }
    }
}

/// Application configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// The MyTardis server.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Privileged helper programs.
    #[serde(default)]
    pub helpers: HelpersConfig,

    /// Metadata cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Descriptor exchange.
    #[serde(default)]
    pub exchange: ExchangeConfig,

    /// Background operation.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// The user that owns every entry. If not specified, the current user.
    #[serde(default = "current_uid")]
    pub uid: u32,

    /// The group that owns every entry. If not specified, the current group.
    #[serde(default = "current_gid")]
    pub gid: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            helpers: HelpersConfig::default(),
            cache: CacheConfig::default(),
            exchange: ExchangeConfig::default(),
            daemon: DaemonConfig::default(),
            uid: current_uid(),
            gid: current_gid(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation errors: {0:?}")]
    ValidationErrors(Vec<String>),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Config {
    /// Validate the correctness of the configuration.
    ///
    /// Returns:
    /// - `Ok(())` if the configuration is valid.
    /// - `Err(Vec<String>)` containing every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.backend.url.starts_with("http://") && !self.backend.url.starts_with("https://") {
            errors.push(format!(
                "Backend URL '{}' must start with http:// or https://.",
                self.backend.url
            ));
        }
        if self.backend.page_size == 0 {
            errors.push("backend.page-size must be at least 1.".to_owned());
        }
        if self.helpers.auth_provider.trim().is_empty() {
            errors.push("helpers.auth-provider must not be empty.".to_owned());
        }
        if self.exchange.poll_interval_ms == 0 {
            errors.push("exchange.poll-interval-ms must be at least 1.".to_owned());
        }
        if self.exchange.timeout_secs == 0 {
            errors.push("exchange.timeout-secs must be at least 1.".to_owned());
        }
        if self.daemon.pid_file.parent().is_none() {
            errors.push(format!(
                "PID file path '{}' has no parent directory.",
                self.daemon.pid_file.display()
            ));
        }
        if self.daemon.log_file.parent().is_none() {
            errors.push(format!(
                "Log file path '{}' has no parent directory.",
                self.daemon.log_file.display()
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Returns config file paths in descending priority order.
    fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(xdg) = dirs::config_dir() {
            paths.push(xdg.join("tardisfs").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("tardisfs").join("config.toml"));
        }

        paths.push(PathBuf::from("/etc/tardisfs/config.toml"));

        paths
    }

    /// Finds the first existing config file from search paths.
    fn find_config_file() -> Option<PathBuf> {
        Self::config_search_paths().into_iter().find(|p| p.exists())
    }

    /// Loads config from a single TOML file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads and validates configuration from the given path, the first file on the search
    /// path, or the defaults.
    pub fn load(external_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match external_config_path
            .map(Path::to_path_buf)
            .or_else(Self::find_config_file)
        {
            Some(path) => Self::load_from_file(&path)?,
            None => {
                debug!("No configuration file found; using defaults.");
                Self::default()
            }
        };

        config.validate().map_err(ConfigError::ValidationErrors)?;
        Ok(config)
    }
}
