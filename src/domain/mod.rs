//! Core types shared across the gateway: requests, response snapshots,
//! partition naming, and the page/controller control messages.

use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

/// Body of the synthetic response returned when an API call fails offline.
pub const OFFLINE_API_MESSAGE: &str = "Offline - please try again when connected";

/// Body of the synthetic response returned when a navigation has no fallback.
pub const OFFLINE_PAGE_BODY: &str = "Offline";

/// How a request was issued by the page.
///
/// `Navigate` marks a top-level document load; everything else (scripts,
/// styles, images, API calls) is a subresource fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Navigate,
    Subresource,
}

/// An outgoing request intercepted by the cache controller.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Bytes,
}

impl FetchRequest {
    /// Build a plain subresource GET for the given URL.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            mode: RequestMode::Subresource,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Build a top-level navigation GET for the given URL.
    pub fn navigation(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    /// Whether this request targets the same origin the controller owns.
    pub fn same_origin(&self, origin: &Url) -> bool {
        self.url.scheme() == origin.scheme()
            && self.url.host_str() == origin.host_str()
            && self.url.port_or_known_default() == origin.port_or_known_default()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// The partition key this request resolves to.
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(&self.method, &self.url)
    }
}

/// Key of a response snapshot inside a partition: request URL plus method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    method: String,
    url: String,
}

impl SnapshotKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        Self {
            method: method.as_str().to_string(),
            url: url.to_string(),
        }
    }

    /// Key under which the app-shell root document is stored.
    pub fn root(origin: &Url) -> Self {
        let mut root = origin.clone();
        root.set_path("/");
        root.set_query(None);
        Self::new(&Method::GET, &root)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// An immutable capture of a prior network response.
///
/// Snapshots are written to a partition only when the status was successful;
/// they are never mutated in place afterwards.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Bytes,
    pub stored_at: OffsetDateTime,
}

impl ResponseSnapshot {
    pub fn new(status: StatusCode, headers: Vec<(HeaderName, HeaderValue)>, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            stored_at: OffsetDateTime::now_utc(),
        }
    }

    /// Whether this response may be written back into a partition.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// How long ago this snapshot was captured.
    pub fn age(&self) -> time::Duration {
        OffsetDateTime::now_utc() - self.stored_at
    }

    /// Synthetic 503 returned for API calls that fail while offline.
    pub fn offline_api() -> Self {
        let body = serde_json::json!({ "message": OFFLINE_API_MESSAGE });
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            vec![(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            Bytes::from(body.to_string()),
        )
    }

    /// Synthetic 503 returned for navigations with no cached fallback.
    pub fn offline_page() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            vec![(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            )],
            Bytes::from_static(OFFLINE_PAGE_BODY.as_bytes()),
        )
    }

    /// Synthetic empty 404 returned for images missing from cache and network.
    pub fn missing_image() -> Self {
        Self::new(StatusCode::NOT_FOUND, Vec::new(), Bytes::new())
    }
}

/// Logical role of a cache partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionRole {
    /// App shell: root document, login/registration pages, manifest, icons.
    Static,
    /// Navigated HTML pages.
    Dynamic,
    /// Uploaded photos and icon assets.
    Images,
}

impl PartitionRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::Images => "images",
        }
    }
}

/// The set of partition names owned by one controller generation.
///
/// Names follow `{prefix}-{role}-{generation}`. Activation deletes every
/// partition whose name is not in this set; the refresh protocol instead
/// wipes everything under the app prefix regardless of generation. The two
/// policies are deliberately kept distinct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSet {
    prefix: String,
    generation: String,
}

impl PartitionSet {
    pub fn new(prefix: impl Into<String>, generation: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            generation: generation.into(),
        }
    }

    pub fn name(&self, role: PartitionRole) -> String {
        format!("{}-{}-{}", self.prefix, role.as_str(), self.generation)
    }

    pub fn names(&self) -> [String; 3] {
        [
            self.name(PartitionRole::Static),
            self.name(PartitionRole::Dynamic),
            self.name(PartitionRole::Images),
        ]
    }

    /// Whether `name` belongs to the current generation.
    pub fn contains(&self, name: &str) -> bool {
        self.names().iter().any(|candidate| candidate == name)
    }

    /// Whether `name` belongs to this app at all, any generation.
    pub fn owned_by_app(&self, name: &str) -> bool {
        name.strip_prefix(&self.prefix)
            .is_some_and(|rest| rest.starts_with('-'))
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }
}

/// Typed envelope passed between a page and the cache controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Page asks the controller to wipe every app partition.
    #[serde(rename = "REFRESH_CACHE")]
    RefreshCache,
    /// Broadcast to all pages once the wipe has been applied.
    #[serde(rename = "CACHE_REFRESHED")]
    CacheRefreshed,
}
