//! Datafile listings through the privileged `_datasetdatafiles` helper.

use std::path::PathBuf;
use std::process::Stdio;

use tracing::{debug, instrument, warn};

use super::{CatalogError, DatafileRecord, pyliteral};
use crate::launcher::Launcher;

/// Runs the listing helper and parses what it prints.
#[derive(Debug, Clone)]
pub struct HelperLister {
    launcher: Launcher,
    program: String,
    install_dir: PathBuf,
    auth_provider: String,
}

impl HelperLister {
    /// A lister invoking `program <install_dir> <auth_provider> <exp_id> <dataset_id>`.
    #[must_use]
    pub fn new(
        launcher: Launcher,
        program: impl Into<String>,
        install_dir: impl Into<PathBuf>,
        auth_provider: impl Into<String>,
    ) -> Self {
        Self {
            launcher,
            program: program.into(),
            install_dir: install_dir.into(),
            auth_provider: auth_provider.into(),
        }
    }

    /// List a dataset's files. Output we cannot parse yields zero records.
    #[instrument(name = "HelperLister::datafiles", skip(self))]
    pub async fn datafiles(
        &self,
        experiment_id: u64,
        dataset_id: u64,
    ) -> Result<Vec<DatafileRecord>, CatalogError> {
        let output = self
            .launcher
            .command(&self.program)
            .arg(&self.install_dir)
            .arg(&self.auth_provider)
            .arg(experiment_id.to_string())
            .arg(dataset_id.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CatalogError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(CatalogError::HelperFailed {
                program: self.program.clone(),
                status: output.status,
                stderr: stderr.trim().to_owned(),
            });
        }
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "helper wrote to stderr");
        }

        Ok(parse_listing(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse the helper's stdout. Denials and tracebacks are logged and produce no records.
pub(crate) fn parse_listing(stdout: &str) -> Vec<DatafileRecord> {
    let stdout = stdout.trim();
    let value = match pyliteral::parse(stdout) {
        Ok(value) => value,
        Err(e) => {
            let first_line = stdout.lines().next().unwrap_or_default();
            warn!(error = %e, output = first_line, "helper did not print a datafile list");
            return Vec::new();
        }
    };

    match serde_json::from_value::<Vec<DatafileRecord>>(value) {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "helper printed a list of unexpected shape");
            Vec::new()
        }
    }
}
