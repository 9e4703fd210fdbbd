//! The resolver's own configuration file.
//!
//! It holds the service account's API key, so it is expected to be readable only by the
//! account the resolver runs as.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

fn default_backend_url() -> String {
    "http://localhost:8000".to_owned()
}

fn default_store_root() -> PathBuf {
    PathBuf::from("/var/lib/mytardis/store")
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_accept_timeout_secs() -> u64 {
    10
}

/// Settings read by `_datafiledescriptord`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResolverConfig {
    /// Base URL of the MyTardis server.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Service account with read access to every experiment's metadata.
    pub service_username: String,

    /// That account's API key.
    pub service_api_key: SecretString,

    /// Directory replica locations are resolved against.
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,

    /// Per-request HTTP timeout, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How long to wait for the client to connect, in seconds.
    #[serde(default = "default_accept_timeout_secs")]
    pub accept_timeout_secs: u64,
}

/// Why the resolver configuration is unusable.
#[derive(Debug, Error)]
pub enum ResolverConfigError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// The path we tried.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// The path we tried.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },

    /// Values parsed but are unusable.
    #[error("invalid resolver configuration: {0:?}")]
    Invalid(Vec<String>),
}

impl ResolverConfig {
    /// Read and validate the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ResolverConfigError> {
        debug!(path = %path.display(), "loading resolver configuration");
        let content = std::fs::read_to_string(path).map_err(|source| ResolverConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ResolverConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        config.validate().map_err(ResolverConfigError::Invalid)?;
        Ok(config)
    }

    /// Check values that deserialized but cannot work.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.store_root.is_absolute() {
            errors.push(format!(
                "store-root '{}' must be an absolute path.",
                self.store_root.display()
            ));
        }
        if self.service_username.trim().is_empty() {
            errors.push("service-username must not be empty.".to_owned());
        }
        if self.accept_timeout_secs == 0 {
            errors.push("accept-timeout-secs must be at least 1.".to_owned());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// HTTP timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Accept timeout as a [`Duration`].
    #[must_use]
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.accept_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret as _;

    use super::*;

    #[test]
    fn minimal_file_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolver.toml");
        std::fs::write(
            &path,
            "service-username = \"svc\"\nservice-api-key = \"k3y\"\n",
        )
        .unwrap();

        let config = ResolverConfig::load(&path).unwrap();
        assert_eq!(config.service_username, "svc");
        assert_eq!(config.service_api_key.expose_secret(), "k3y");
        assert_eq!(config.store_root, default_store_root());
        assert_eq!(config.accept_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn relative_store_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolver.toml");
        std::fs::write(
            &path,
            "service-username = \"svc\"\nservice-api-key = \"k\"\nstore-root = \"store\"\n",
        )
        .unwrap();

        let err = ResolverConfig::load(&path).unwrap_err();
        assert!(matches!(err, ResolverConfigError::Invalid(ref e) if e.len() == 1), "{err:?}");
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = ResolverConfig::load(Path::new("/nonexistent/resolver.toml")).unwrap_err();
        assert!(matches!(err, ResolverConfigError::Read { .. }));
    }
}
