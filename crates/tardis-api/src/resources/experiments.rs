//! Experiment resource.

use std::sync::Arc;

use crate::client::TardisClient;
use crate::error::TardisError;
use crate::http_client::HttpClient;
use crate::models::Experiment;
use crate::pagination::PageStream;

/// Operations on experiments visible to the authenticated user.
pub struct ExperimentsResource<'c, C: HttpClient> {
    client: &'c TardisClient<C>,
}

impl<'c, C: HttpClient> ExperimentsResource<'c, C> {
    pub(crate) fn new(client: &'c TardisClient<C>) -> Self {
        Self { client }
    }

    /// Return a [`PageStream`] over every experiment.
    #[must_use]
    pub fn list_all(&self) -> PageStream<C, Experiment> {
        PageStream::new(
            Arc::clone(&self.client.inner),
            "/experiment/".to_owned(),
            Vec::new(),
        )
    }

    /// Get a single experiment by id.
    pub async fn get(&self, id: u64) -> Result<Experiment, TardisError> {
        self.client
            .inner
            .get(&format!("/experiment/{id}/"), &[])
            .await
    }
}
