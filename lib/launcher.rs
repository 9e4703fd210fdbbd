//! Running the privileged helper programs.

use std::ffi::OsStr;
use std::path::PathBuf;

use tokio::process::Command;

const SUDO: &str = "sudo";

/// Builds commands for helper programs, optionally escalating through `sudo -n -u <user>`.
#[derive(Debug, Clone)]
pub struct Launcher {
    run_as: Option<String>,
    sudo: PathBuf,
}

impl Launcher {
    /// Run helpers as `user` through non-interactive `sudo`.
    #[must_use]
    pub fn sudo(user: impl Into<String>) -> Self {
        Self {
            run_as: Some(user.into()),
            sudo: PathBuf::from(SUDO),
        }
    }

    /// Run helpers directly, as the current user.
    #[must_use]
    pub fn direct() -> Self {
        Self {
            run_as: None,
            sudo: PathBuf::from(SUDO),
        }
    }

    /// The account helpers run as, if escalating.
    #[must_use]
    pub fn run_as(&self) -> Option<&str> {
        self.run_as.as_deref()
    }

    /// A command that runs `program` with the configured escalation. Arguments are appended
    /// by the caller.
    pub fn command(&self, program: impl AsRef<OsStr>) -> Command {
        match &self.run_as {
            Some(user) => {
                let mut cmd = Command::new(&self.sudo);
                cmd.arg("-n").arg("-u").arg(user).arg(program);
                cmd
            }
            None => Command::new(program),
        }
    }
}
