//! Offset pagination over tastypie-style list endpoints.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use serde::de::DeserializeOwned;

use crate::client::ClientInner;
use crate::error::TardisError;
use crate::http_client::HttpClient;
use crate::models::Listing;

enum Cursor {
    /// Nothing fetched yet; the first request is built from path and query.
    Start,
    /// Server-relative path of the next page.
    Next(String),
    Done,
}

/// An async page stream that lazily fetches pages by following `meta.next`.
///
/// Owns all its state (via `Arc`) so there are no lifetime parameters.
pub struct PageStream<C: HttpClient, T: DeserializeOwned> {
    inner: Arc<ClientInner<C>>,
    path: String,
    query: Vec<(String, String)>,
    cursor: Cursor,
    buffer: VecDeque<T>,
}

impl<C: HttpClient, T: DeserializeOwned + Send + 'static> PageStream<C, T> {
    pub(crate) fn new(
        inner: Arc<ClientInner<C>>,
        path: String,
        query: Vec<(String, String)>,
    ) -> Self {
        Self {
            inner,
            path,
            query,
            cursor: Cursor::Start,
            buffer: VecDeque::new(),
        }
    }

    /// Fetch the next individual item, requesting new pages as needed.
    ///
    /// Returns `Ok(None)` when all pages have been exhausted.
    pub async fn next(&mut self) -> Result<Option<T>, TardisError> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            if !self.fetch_page().await? {
                return Ok(None);
            }
        }
    }

    /// Collect all remaining items into a `Vec`.
    pub async fn collect(mut self) -> Result<Vec<T>, TardisError> {
        let mut all = Vec::new();
        while let Some(item) = self.next().await? {
            all.push(item);
        }
        Ok(all)
    }

    /// Adapt into a [`Stream`] of items.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, TardisError>> {
        futures::stream::try_unfold(self, |mut pages| async move {
            Ok(pages.next().await?.map(|item| (item, pages)))
        })
    }

    /// Fetch one page into the buffer. Returns `false` once there is nothing left.
    async fn fetch_page(&mut self) -> Result<bool, TardisError> {
        let page: Listing<T> = match std::mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::Done => return Ok(false),
            Cursor::Start => {
                let limit = self.inner.page_size().to_string();
                let mut query: Vec<(&str, &str)> = self
                    .query
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                query.push(("limit", &limit));
                self.inner.get(&self.path, &query).await?
            }
            Cursor::Next(next) => self.inner.get_raw(&next).await?,
        };

        if let Some(next) = page.meta.next.filter(|n| !n.is_empty())
            && !page.objects.is_empty()
        {
            self.cursor = Cursor::Next(next);
        }
        self.buffer.extend(page.objects);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Mutex;

    use bytes::Bytes;
    use futures::TryStreamExt as _;
    use http::{HeaderMap, StatusCode};

    use crate::error::HttpClientError;
    use crate::http_client::{HttpRequest, HttpResponse};
    use crate::models::Experiment;
    use crate::{ClientBuilder, HttpClient};

    /// Serves canned bodies keyed by URL and records every request.
    struct CannedHttp {
        pages: Vec<(&'static str, &'static str)>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl HttpClient for CannedHttp {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
            let body = self
                .pages
                .iter()
                .find(|(url, _)| *url == request.url)
                .map(|(_, body)| *body);
            self.seen.lock().unwrap().push(request);
            Ok(match body {
                Some(body) => HttpResponse {
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    body: Bytes::from_static(body.as_bytes()),
                },
                None => HttpResponse {
                    status: StatusCode::NOT_FOUND,
                    headers: HeaderMap::new(),
                    body: Bytes::new(),
                },
            })
        }
    }

    const FIRST: &str = r#"{
        "meta": {"limit": 1, "next": "/api/v1/experiment/?format=json&limit=1&offset=1",
                 "offset": 0, "previous": null, "total_count": 2},
        "objects": [{"id": 73, "title": "Beamline Run", "created_time": "2014-03-01T10:00:00"}]
    }"#;
    const SECOND: &str = r#"{
        "meta": {"limit": 1, "next": null, "offset": 1, "previous": null, "total_count": 2},
        "objects": [{"id": 74, "title": "Calibration"}]
    }"#;

    #[tokio::test]
    async fn follows_next_links_until_exhausted() {
        let http = CannedHttp {
            pages: vec![
                (
                    "https://store.example.org/api/v1/experiment/?format=json&limit=1",
                    FIRST,
                ),
                (
                    "https://store.example.org/api/v1/experiment/?format=json&limit=1&offset=1",
                    SECOND,
                ),
            ],
            seen: Mutex::new(Vec::new()),
        };
        let client = ClientBuilder::new("https://store.example.org/", "alice", "key")
            .page_size(1)
            .build_with(http)
            .unwrap();

        let experiments: Vec<Experiment> = client
            .experiments()
            .list_all()
            .into_stream()
            .try_collect()
            .await
            .unwrap();

        let ids: Vec<u64> = experiments.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![73, 74]);

        let seen = client.inner.http_for_tests().seen.lock().unwrap();
        assert_eq!(seen.len(), 2, "exactly one request per page");
        assert_eq!(
            seen[0].headers.get(http::header::AUTHORIZATION).unwrap(),
            "ApiKey alice:key"
        );
    }

    #[tokio::test]
    async fn error_status_surfaces_as_status_error() {
        let http = CannedHttp {
            pages: Vec::new(),
            seen: Mutex::new(Vec::new()),
        };
        let client = ClientBuilder::new("https://store.example.org", "alice", "key")
            .build_with(http)
            .unwrap();

        let err = client.experiments().get(1).await.unwrap_err();
        assert!(err.is_not_found(), "expected 404, got {err:?}");
    }
}
