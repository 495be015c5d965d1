//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::{HeaderValue, StatusCode, header};
use bytes::Bytes;
use url::Url;

use scorta::controller::{
    CacheController, CacheMode, ControllerConfig, FetchError, NetworkFetcher,
};
use scorta::domain::{FetchRequest, ResponseSnapshot};
use scorta::store::MemoryStore;

pub const ORIGIN: &str = "http://127.0.0.1:8700";

pub fn origin() -> Url {
    Url::parse(ORIGIN).expect("origin")
}

pub fn config(generation: &str) -> ControllerConfig {
    ControllerConfig {
        origin: origin(),
        app_prefix: "app".to_string(),
        generation: generation.to_string(),
        static_manifest: vec![
            "/".to_string(),
            "/login".to_string(),
            "/manifest.webmanifest".to_string(),
        ],
        api_prefix: "/api/".to_string(),
        image_prefixes: vec!["/uploads/".to_string(), "/icons/".to_string()],
    }
}

pub fn html_snapshot(status: StatusCode, body: &str) -> ResponseSnapshot {
    ResponseSnapshot::new(
        status,
        vec![(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        )],
        Bytes::from(body.to_string()),
    )
}

/// A fetcher that serves `page:{path}` for every path unless a scripted
/// response overrides it, and fails everything while `offline` is set.
/// Counts calls per path so tests can assert that cache hits never touch
/// the network.
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, ResponseSnapshot>>,
    offline: AtomicBool,
    calls: Mutex<HashMap<String, usize>>,
    total_calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            calls: Mutex::new(HashMap::new()),
            total_calls: AtomicUsize::new(0),
        }
    }

    pub fn route(&self, path: &str, snapshot: ResponseSnapshot) {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(path.to_string(), snapshot);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self, path: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        _mode: CacheMode,
    ) -> Result<ResponseSnapshot, FetchError> {
        let path = request.path().to_string();
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .expect("calls lock")
            .entry(path.clone())
            .or_insert(0) += 1;

        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::network("connection refused"));
        }

        if let Some(snapshot) = self.routes.lock().expect("routes lock").get(&path) {
            return Ok(snapshot.clone());
        }

        Ok(ResponseSnapshot::new(
            StatusCode::OK,
            vec![(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            )],
            Bytes::from(format!("page:{path}")),
        ))
    }
}

/// A controller over a fresh in-memory store, installed and activated.
pub async fn active_controller(
    fetcher: Arc<ScriptedFetcher>,
) -> (Arc<CacheController>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let controller = Arc::new(CacheController::new(
        config("v1"),
        store.clone(),
        fetcher,
    ));
    controller.install().await.expect("install");
    controller.activate().await.expect("activate");
    (controller, store)
}

pub fn get(path: &str) -> FetchRequest {
    FetchRequest::get(origin().join(path).expect("path"))
}

pub fn navigation(path: &str) -> FetchRequest {
    FetchRequest::navigation(origin().join(path).expect("path"))
}
