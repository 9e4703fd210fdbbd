//! User-authentication resource.

use crate::client::TardisClient;
use crate::error::TardisError;
use crate::http_client::HttpClient;
use crate::models::{Listing, UserAuthentication};

/// Maps external identities to MyTardis accounts.
pub struct UserAuthenticationsResource<'c, C: HttpClient> {
    client: &'c TardisClient<C>,
}

impl<'c, C: HttpClient> UserAuthenticationsResource<'c, C> {
    pub(crate) fn new(client: &'c TardisClient<C>) -> Self {
        Self { client }
    }

    /// Find the account that `username` maps to under `method`.
    ///
    /// Returns `Ok(None)` when no mapping exists.
    pub async fn find(
        &self,
        username: &str,
        method: &str,
    ) -> Result<Option<UserAuthentication>, TardisError> {
        let page: Listing<UserAuthentication> = self
            .client
            .inner
            .get(
                "/userauthentication/",
                &[("username", username), ("authenticationMethod", method)],
            )
            .await?;
        Ok(page
            .objects
            .into_iter()
            .find(|ua| ua.username == username && ua.authentication_method == method))
    }
}
