//! Real network access for the controller.
//!
//! `HttpFetcher` rewrites intercepted request URLs onto the configured
//! upstream origin and replays them with reqwest. The controller never talks
//! to the network directly; it only sees the [`NetworkFetcher`] trait, which
//! keeps the strategy layer testable without sockets.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use tracing::warn;
use url::Url;

use crate::controller::{CacheMode, FetchError, NetworkFetcher};
use crate::domain::{FetchRequest, ResponseSnapshot};

/// Hop-by-hop headers that must not be replayed upstream.
const SKIPPED_REQUEST_HEADERS: [HeaderName; 3] = [
    header::HOST,
    header::CONTENT_LENGTH,
    header::CONNECTION,
];

pub struct HttpFetcher {
    client: reqwest::Client,
    upstream: Url,
}

impl HttpFetcher {
    pub fn new(upstream: Url, timeout: Duration) -> Result<Self, super::error::InfraError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| {
                super::error::InfraError::upstream(format!(
                    "failed to build upstream client: {err}"
                ))
            })?;
        Ok(Self { client, upstream })
    }

    /// Map an intercepted URL onto the upstream origin, keeping path and
    /// query intact.
    fn rewrite(&self, url: &Url) -> Url {
        let mut target = self.upstream.clone();
        target.set_path(url.path());
        target.set_query(url.query());
        target
    }
}

#[async_trait]
impl NetworkFetcher for HttpFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        mode: CacheMode,
    ) -> Result<ResponseSnapshot, FetchError> {
        let target = self.rewrite(&request.url);

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            if SKIPPED_REQUEST_HEADERS.contains(name) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        if mode == CacheMode::NoStore {
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        }

        let mut builder = self
            .client
            .request(request.method.clone(), target.as_str())
            .headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|err| FetchError::network(err.to_string()))?;

        let status = response.status();
        let mut response_headers = Vec::with_capacity(response.headers().len());
        for (name, value) in response.headers() {
            response_headers.push((name.clone(), value.clone()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| FetchError::network(format!("failed to read upstream body: {err}")))?;

        if status.is_server_error() {
            warn!(
                target = %target,
                status = status.as_u16(),
                "upstream_server_error"
            );
        }

        Ok(ResponseSnapshot::new(status, response_headers, body))
    }
}
