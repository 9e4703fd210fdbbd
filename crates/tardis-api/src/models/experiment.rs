//! Experiment model.

use serde::Deserialize;

/// `public_access` levels at or above this imply the experiment's data may be distributed.
pub const PUBLIC_ACCESS_METADATA: i64 = 50;

/// An experiment, the top level of the hierarchy.
#[derive(Debug, Clone, Deserialize)]
pub struct Experiment {
    /// Object id.
    pub id: u64,
    /// Free-text title; becomes part of the directory name.
    #[serde(default)]
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: Option<String>,
    /// Creation timestamp, loosely ISO-8601.
    #[serde(default)]
    pub created_time: Option<String>,
    /// Last update timestamp.
    #[serde(default)]
    pub update_time: Option<String>,
    /// Public access level as stored by the server.
    #[serde(default)]
    pub public_access: Option<i64>,
}

impl Experiment {
    /// Whether the experiment's public access level allows distributing its files.
    #[must_use]
    pub fn public_access_implies_distribution(&self) -> bool {
        self.public_access
            .is_some_and(|level| level > PUBLIC_ACCESS_METADATA)
    }
}
