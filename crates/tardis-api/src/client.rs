//! Client construction and the shared request path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{ACCEPT, AUTHORIZATION};
use http::{HeaderMap, HeaderValue, Method};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::TardisError;
use crate::http_client::{HttpClient, HttpRequest};
use crate::resources::{
    AclsResource, DatafilesResource, DatasetsResource, ExperimentsResource,
    UserAuthenticationsResource,
};

/// Prefix of every v1 endpoint.
pub(crate) const API_PREFIX: &str = "/api/v1";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How many objects to request per page. `0` asks the server for everything at once.
const DEFAULT_PAGE_SIZE: u32 = 0;

/// Connection parameters for a MyTardis instance.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the instance, e.g. `https://store.example.org`.
    pub base_url: String,
    /// MyTardis username the API key belongs to.
    pub username: String,
    /// The API key itself.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Objects per page for list endpoints.
    pub page_size: u32,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("api_key", &"****")
            .field("timeout", &self.timeout)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// Builder for [`TardisClient`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Start building a client for `base_url`, authenticating as `username` with `api_key`.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            config: ClientConfig {
                base_url: base_url.into(),
                username: username.into(),
                api_key: api_key.into(),
                timeout: DEFAULT_TIMEOUT,
                page_size: DEFAULT_PAGE_SIZE,
            },
        }
    }

    /// Override the per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Override the page size used by list endpoints.
    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.config.page_size = page_size;
        self
    }

    /// Build a client on top of a caller-provided HTTP backend.
    pub fn build_with<C: HttpClient>(self, http: C) -> Result<TardisClient<C>, TardisError> {
        TardisClient::new(self.config, http)
    }

    /// Build a client using the default `reqwest` backend.
    #[cfg(feature = "reqwest-client")]
    pub fn build(self) -> Result<Tardis, TardisError> {
        let http = crate::backends::ReqwestClient::new(self.config.timeout);
        TardisClient::new(self.config, http)
    }
}

/// A MyTardis client using the default `reqwest` backend.
#[cfg(feature = "reqwest-client")]
pub type Tardis = TardisClient<crate::backends::ReqwestClient>;

pub(crate) struct ClientInner<C: HttpClient> {
    config: ClientConfig,
    http: C,
    headers: HeaderMap,
}

impl<C: HttpClient> ClientInner<C> {
    pub(crate) fn page_size(&self) -> u32 {
        self.config.page_size
    }

    #[cfg(test)]
    pub(crate) fn http_for_tests(&self) -> &C {
        &self.http
    }

    /// GET `path` (relative to the API prefix) with `query`, decoding the JSON body.
    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, TardisError> {
        let mut path_and_query = format!("{API_PREFIX}{path}?format=json");
        for (key, value) in query {
            path_and_query.push('&');
            path_and_query.push_str(&encode_component(key));
            path_and_query.push('=');
            path_and_query.push_str(&encode_component(value));
        }
        self.get_raw(&path_and_query).await
    }

    /// GET a server-relative path verbatim, as handed back in `meta.next`.
    pub(crate) async fn get_raw<T: DeserializeOwned>(
        &self,
        path_and_query: &str,
    ) -> Result<T, TardisError> {
        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            path_and_query
        );
        debug!(%url, "GET");

        let response = self
            .http
            .send(HttpRequest {
                method: Method::GET,
                url: url.clone(),
                headers: self.headers.clone(),
            })
            .await?;

        if !response.status.is_success() {
            let body = String::from_utf8_lossy(&response.body)
                .chars()
                .take(512)
                .collect();
            return Err(TardisError::Status {
                status: response.status,
                url,
                body,
            });
        }

        trace!(bytes = response.body.len(), "decoding response");
        serde_json::from_slice(&response.body).map_err(|source| TardisError::Decode { url, source })
    }
}

/// Handle to a MyTardis instance.
///
/// Cheap to clone; all clones share one HTTP backend.
pub struct TardisClient<C: HttpClient> {
    pub(crate) inner: Arc<ClientInner<C>>,
}

impl<C: HttpClient> Clone for TardisClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: HttpClient> fmt::Debug for TardisClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TardisClient")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<C: HttpClient> TardisClient<C> {
    /// Create a client from a full configuration and HTTP backend.
    pub fn new(config: ClientConfig, http: C) -> Result<Self, TardisError> {
        if config.base_url.is_empty() {
            return Err(TardisError::InvalidConfig("base URL is empty".to_owned()));
        }

        let auth = format!("ApiKey {}:{}", config.username, config.api_key);
        let mut auth = HeaderValue::from_str(&auth).map_err(|_| {
            TardisError::InvalidConfig("API credentials contain invalid characters".to_owned())
        })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                http,
                headers,
            }),
        })
    }

    /// Experiment endpoints.
    #[must_use]
    pub fn experiments(&self) -> ExperimentsResource<'_, C> {
        ExperimentsResource::new(self)
    }

    /// Dataset endpoints.
    #[must_use]
    pub fn datasets(&self) -> DatasetsResource<'_, C> {
        DatasetsResource::new(self)
    }

    /// Datafile endpoints.
    #[must_use]
    pub fn datafiles(&self) -> DatafilesResource<'_, C> {
        DatafilesResource::new(self)
    }

    /// User-authentication lookups, mapping external identities to MyTardis users.
    #[must_use]
    pub fn user_authentications(&self) -> UserAuthenticationsResource<'_, C> {
        UserAuthenticationsResource::new(self)
    }

    /// Object ACL endpoints.
    #[must_use]
    pub fn acls(&self) -> AclsResource<'_, C> {
        AclsResource::new(self)
    }
}

/// Percent-encode a query component, leaving RFC 3986 unreserved characters alone.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(byte));
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_component_escapes_reserved_bytes() {
        assert_eq!(encode_component("abc-1.2_~"), "abc-1.2_~");
        assert_eq!(encode_component("a b&c=d"), "a%20b%26c%3Dd");
        assert_eq!(encode_component("é"), "%C3%A9");
    }

    #[test]
    fn debug_output_masks_api_key() {
        let config = ClientBuilder::new("https://store.example.org", "alice", "s3cret").config;
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("s3cret"), "api key leaked: {rendered}");
        assert!(rendered.contains("alice"));
    }
}
