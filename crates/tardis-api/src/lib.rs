//! Rust SDK for the MyTardis v1 REST API.
//!
//! Only the read side of the API is covered: experiments, datasets, datafiles and the
//! user-authentication / ACL records the access checks need.

mod backends;
mod client;
pub mod error;
mod http_client;
pub mod models;
mod pagination;
mod resources;

#[cfg(feature = "reqwest-client")]
pub use backends::ReqwestClient;
#[cfg(feature = "reqwest-client")]
pub use client::Tardis;
pub use client::{ClientBuilder, ClientConfig, TardisClient};
pub use error::{HttpClientError, TardisError};
pub use http_client::{HttpClient, HttpRequest, HttpResponse};
pub use pagination::PageStream;
pub use resources::{
    AclsResource, DatafilesResource, DatasetsResource, ExperimentsResource,
    UserAuthenticationsResource,
};
