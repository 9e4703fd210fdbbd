//! Datafile resource.

use std::sync::Arc;

use crate::client::TardisClient;
use crate::error::TardisError;
use crate::http_client::HttpClient;
use crate::models::Datafile;
use crate::pagination::PageStream;

/// Operations on datafiles.
pub struct DatafilesResource<'c, C: HttpClient> {
    client: &'c TardisClient<C>,
}

impl<'c, C: HttpClient> DatafilesResource<'c, C> {
    pub(crate) fn new(client: &'c TardisClient<C>) -> Self {
        Self { client }
    }

    /// Return a [`PageStream`] over the files of one dataset.
    #[must_use]
    pub fn list_for_dataset(&self, dataset_id: u64) -> PageStream<C, Datafile> {
        PageStream::new(
            Arc::clone(&self.client.inner),
            "/dataset_file/".to_owned(),
            vec![("dataset__id".to_owned(), dataset_id.to_string())],
        )
    }

    /// Get a single datafile, including its replicas.
    pub async fn get(&self, id: u64) -> Result<Datafile, TardisError> {
        self.client
            .inner
            .get(&format!("/dataset_file/{id}/"), &[])
            .await
    }
}
