//! Object ACL resource.

use crate::client::TardisClient;
use crate::error::TardisError;
use crate::http_client::HttpClient;
use crate::models::{Listing, ObjectAcl};

/// Read access to experiment ACLs.
pub struct AclsResource<'c, C: HttpClient> {
    client: &'c TardisClient<C>,
}

impl<'c, C: HttpClient> AclsResource<'c, C> {
    pub(crate) fn new(client: &'c TardisClient<C>) -> Self {
        Self { client }
    }

    /// Every ACL entry attached to an experiment.
    pub async fn for_experiment(&self, experiment_id: u64) -> Result<Vec<ObjectAcl>, TardisError> {
        let id = experiment_id.to_string();
        let page: Listing<ObjectAcl> = self
            .client
            .inner
            .get(
                "/objectacl/",
                &[
                    ("content_type__model", "experiment"),
                    ("object_id", &id),
                    ("limit", "0"),
                ],
            )
            .await?;
        Ok(page.objects)
    }
}
