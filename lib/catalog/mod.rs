//! Where the hierarchy's metadata comes from.
//!
//! [`Catalog`] is the seam between the tree builder and the backend. [`RemoteCatalog`] talks
//! to the REST API and can hand datafile listings off to the privileged helper program.

mod helper;
pub mod pyliteral;
mod remote;

use std::future::Future;

use serde::Deserialize;
use thiserror::Error;

pub use helper::HelperLister;
pub use remote::RemoteCatalog;

/// An experiment as the tree builder needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentRecord {
    /// Backend id.
    pub id: u64,
    /// Title, unsanitized.
    pub title: String,
    /// Creation time as the backend reported it.
    pub created_time: Option<String>,
}

/// A dataset as the tree builder needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRecord {
    /// Backend id.
    pub id: u64,
    /// Description, unsanitized.
    pub description: String,
    /// Creation time as the backend reported it.
    pub created_time: Option<String>,
}

/// A datafile as the tree builder needs it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatafileRecord {
    /// Backend id.
    pub id: u64,
    /// Subdirectory inside the dataset, if any.
    #[serde(default)]
    pub directory: Option<String>,
    /// File name.
    pub filename: String,
    /// Size in bytes, when the backend gave us something numeric.
    #[serde(default, deserialize_with = "tardis_api::models::lenient_size")]
    pub size: Option<u64>,
    /// Creation time as the backend reported it.
    #[serde(default)]
    pub created_time: Option<String>,
    /// Modification time as the backend reported it.
    #[serde(default)]
    pub modification_time: Option<String>,
}

/// Failures fetching metadata from the backend.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The REST API call failed.
    #[error("backend request failed: {0}")]
    Api(#[from] tardis_api::TardisError),

    /// The listing helper could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Helper program.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The listing helper exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    HelperFailed {
        /// Helper program.
        program: String,
        /// Exit status.
        status: std::process::ExitStatus,
        /// Its stderr.
        stderr: String,
    },
}

/// Source of experiment, dataset and datafile listings.
pub trait Catalog: Send + Sync + 'static {
    /// Every experiment visible to the mounting user.
    fn experiments(&self)
    -> impl Future<Output = Result<Vec<ExperimentRecord>, CatalogError>> + Send;

    /// Datasets belonging to an experiment.
    fn datasets(
        &self,
        experiment_id: u64,
    ) -> impl Future<Output = Result<Vec<DatasetRecord>, CatalogError>> + Send;

    /// Datafiles of a dataset, reached through the given experiment.
    fn datafiles(
        &self,
        experiment_id: u64,
        dataset_id: u64,
    ) -> impl Future<Output = Result<Vec<DatafileRecord>, CatalogError>> + Send;
}
