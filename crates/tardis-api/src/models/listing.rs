//! The envelope every list endpoint returns.

use serde::Deserialize;

/// Pagination metadata attached to list responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListMeta {
    /// Page size the server applied.
    #[serde(default)]
    pub limit: u64,
    /// Server-relative path of the next page, if there is one.
    #[serde(default)]
    pub next: Option<String>,
    /// Offset of the first object in this page.
    #[serde(default)]
    pub offset: u64,
    /// Server-relative path of the previous page.
    #[serde(default)]
    pub previous: Option<String>,
    /// Total objects matching the query across all pages.
    #[serde(default)]
    pub total_count: u64,
}

/// One page of a list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Listing<T> {
    /// Paging information.
    #[serde(default)]
    pub meta: ListMeta,
    /// The objects in this page.
    #[serde(default = "Vec::new")]
    pub objects: Vec<T>,
}
