//! Dataset model.

use serde::Deserialize;

use super::id_from_uri;

/// A dataset, the second level of the hierarchy.
#[derive(Debug, Clone, Deserialize)]
pub struct Dataset {
    /// Object id.
    pub id: u64,
    /// Description; becomes part of the directory name.
    #[serde(default)]
    pub description: String,
    /// Resource URIs of the experiments this dataset belongs to.
    #[serde(default)]
    pub experiments: Vec<String>,
    /// Creation timestamp, if the server reports one.
    #[serde(default)]
    pub created_time: Option<String>,
    /// Last modification timestamp, if the server reports one.
    #[serde(default)]
    pub modified_time: Option<String>,
}

impl Dataset {
    /// Ids of the experiments this dataset belongs to, skipping malformed URIs.
    pub fn experiment_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.experiments.iter().filter_map(|uri| id_from_uri(uri))
    }
}
