//! Backend API credentials and the `_myapikey` helper that hands them out.

use std::fmt;
use std::path::Path;
use std::process::Stdio;

use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::launcher::Launcher;

/// A MyTardis username and API key.
#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiCredentials {
    /// MyTardis username the key belongs to.
    pub username: String,
    /// The key itself.
    #[serde(serialize_with = "serialize_masked")]
    pub api_key: SecretString,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("username", &self.username)
            .field("api_key", &"****")
            .finish()
    }
}

impl ApiCredentials {
    /// Expose the key for building a client.
    #[must_use]
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

fn serialize_masked<S>(_key: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str("****")
}

/// Reasons the API key helper could not provide credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The helper could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Helper program.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The helper ran but reported failure.
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        /// Helper program.
        program: String,
        /// Exit status.
        status: std::process::ExitStatus,
        /// What it printed on stderr.
        stderr: String,
    },

    /// The helper's output was not `ApiKey <user>:<key>`.
    #[error("{program} printed something other than an API key line")]
    Malformed {
        /// Helper program.
        program: String,
    },
}

/// Parse the `ApiKey <user>:<key>` line the helper prints.
#[must_use]
pub fn parse_api_key_line(output: &str) -> Option<ApiCredentials> {
    let rest = output.trim().strip_prefix("ApiKey")?.trim_start();
    let (username, key) = rest.split_once(':')?;
    let (username, key) = (username.trim(), key.trim());
    if username.is_empty() || key.is_empty() || username.contains(char::is_whitespace) {
        return None;
    }
    Some(ApiCredentials {
        username: username.to_owned(),
        api_key: SecretString::from(key.to_owned()),
    })
}

/// Ask the privileged helper for the calling user's API key.
pub async fn fetch_api_key(
    launcher: &Launcher,
    program: &str,
    install_dir: &Path,
    auth_provider: &str,
) -> Result<ApiCredentials, CredentialError> {
    debug!(program, run_as = ?launcher.run_as(), "requesting API key from helper");
    let output = launcher
        .command(program)
        .arg(install_dir)
        .arg(auth_provider)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| CredentialError::Spawn {
            program: program.to_owned(),
            source,
        })?;

    if !output.status.success() {
        return Err(CredentialError::Failed {
            program: program.to_owned(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    let credentials = parse_api_key_line(&String::from_utf8_lossy(&output.stdout)).ok_or_else(
        || CredentialError::Malformed {
            program: program.to_owned(),
        },
    )?;
    info!(username = %credentials.username, "obtained API key");
    Ok(credentials)
}
