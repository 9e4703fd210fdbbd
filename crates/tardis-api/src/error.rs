//! Error types returned by the SDK.

use http::StatusCode;

/// Transport-level failures reported by an [`HttpClient`](crate::HttpClient) backend.
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The server could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Any other backend failure.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Errors returned by [`TardisClient`](crate::TardisClient) operations.
#[derive(Debug, thiserror::Error)]
pub enum TardisError {
    /// The HTTP backend failed before a response was received.
    #[error("http transport error: {0}")]
    Http(#[from] HttpClientError),

    /// The server answered with a non-success status.
    #[error("server returned {status} for {url}")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Requested URL, without credentials.
        url: String,
        /// First bytes of the response body, for diagnostics.
        body: String,
    },

    /// The response body was not the JSON shape we expected.
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The client configuration cannot produce a valid request.
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl TardisError {
    /// Whether the server reported that the requested object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}
