//! Dataset resource.

use std::sync::Arc;

use crate::client::TardisClient;
use crate::error::TardisError;
use crate::http_client::HttpClient;
use crate::models::Dataset;
use crate::pagination::PageStream;

/// Operations on datasets.
pub struct DatasetsResource<'c, C: HttpClient> {
    client: &'c TardisClient<C>,
}

impl<'c, C: HttpClient> DatasetsResource<'c, C> {
    pub(crate) fn new(client: &'c TardisClient<C>) -> Self {
        Self { client }
    }

    /// Return a [`PageStream`] over the datasets of one experiment.
    #[must_use]
    pub fn list_for_experiment(&self, experiment_id: u64) -> PageStream<C, Dataset> {
        PageStream::new(
            Arc::clone(&self.client.inner),
            "/dataset/".to_owned(),
            vec![("experiments__id".to_owned(), experiment_id.to_string())],
        )
    }

    /// Get a single dataset by id.
    pub async fn get(&self, id: u64) -> Result<Dataset, TardisError> {
        self.client.inner.get(&format!("/dataset/{id}/"), &[]).await
    }
}
