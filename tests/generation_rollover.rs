//! Generation rollover: bumping the partition generation invalidates every
//! snapshot at once, and a failed install never leaves partial state behind.

use std::sync::Arc;

use axum::http::StatusCode;

use scorta::controller::{CacheController, FetchOutcome, InstallError, LifecycleState};
use scorta::store::MemoryStore;

mod common;
use common::{ScriptedFetcher, config, get, html_snapshot};

#[tokio::test]
async fn activation_deletes_stale_generation_partitions() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = Arc::new(MemoryStore::new());

    let v1 = CacheController::new(config("v1"), store.clone(), fetcher.clone());
    v1.install().await.expect("install v1");
    v1.activate().await.expect("activate v1");

    // Populate the v1 images partition beyond the app shell.
    match v1.handle_fetch(&get("/uploads/photo.png")).await {
        FetchOutcome::Response(_) => {}
        FetchOutcome::Passthrough => panic!("expected a resolved response"),
    }
    assert_eq!(store.partition_len("app-static-v1"), Some(3));
    assert_eq!(store.partition_len("app-images-v1"), Some(1));

    let v2 = CacheController::new(config("v2"), store.clone(), fetcher.clone());
    v2.install().await.expect("install v2");
    v2.activate().await.expect("activate v2");

    assert_eq!(store.partition_len("app-static-v1"), None);
    assert_eq!(store.partition_len("app-dynamic-v1"), None);
    assert_eq!(store.partition_len("app-images-v1"), None);
    assert_eq!(store.partition_len("app-static-v2"), Some(3));
}

#[tokio::test]
async fn lookups_never_cross_generations() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = Arc::new(MemoryStore::new());

    let v1 = CacheController::new(config("v1"), store.clone(), fetcher.clone());
    v1.install().await.expect("install v1");
    v1.activate().await.expect("activate v1");
    match v1.handle_fetch(&get("/uploads/photo.png")).await {
        FetchOutcome::Response(snapshot) => assert_eq!(snapshot.status, StatusCode::OK),
        FetchOutcome::Passthrough => panic!("expected a resolved response"),
    }

    // A v2 controller over the same store, with the old partitions still
    // present (no activation yet), must not read the v1 snapshot.
    let v2 = Arc::new(CacheController::new(
        config("v2"),
        store.clone(),
        fetcher.clone(),
    ));
    v2.install().await.expect("install v2");
    v2.activate().await.expect("activate v2");

    fetcher.set_offline(true);
    match v2.handle_fetch(&get("/uploads/photo.png")).await {
        FetchOutcome::Response(snapshot) => {
            assert_eq!(snapshot.status, StatusCode::NOT_FOUND);
        }
        FetchOutcome::Passthrough => panic!("expected a resolved response"),
    }
}

#[tokio::test]
async fn failed_install_leaves_the_store_untouched() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = Arc::new(MemoryStore::new());

    let v1 = CacheController::new(config("v1"), store.clone(), fetcher.clone());
    v1.install().await.expect("install v1");
    v1.activate().await.expect("activate v1");

    // One broken app-shell asset fails the whole v2 install.
    fetcher.route(
        "/login",
        html_snapshot(StatusCode::INTERNAL_SERVER_ERROR, "broken deploy"),
    );
    let v2 = CacheController::new(config("v2"), store.clone(), fetcher.clone());
    let error = v2.install().await.expect_err("install must fail");

    assert!(matches!(error, InstallError::Asset { status: 500, .. }));
    assert_eq!(v2.state(), LifecycleState::Installing);
    // Nothing was written for v2 and the v1 shell keeps serving.
    assert_eq!(store.partition_len("app-static-v2"), None);
    assert_eq!(store.partition_len("app-static-v1"), Some(3));
}

#[tokio::test]
async fn failed_install_mid_manifest_writes_nothing() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = Arc::new(MemoryStore::new());

    // The manifest fetches in order; "/" succeeds before "/login" fails.
    // All-or-nothing still holds because writes only start after every
    // fetch has succeeded.
    fetcher.route("/login", html_snapshot(StatusCode::BAD_GATEWAY, "nope"));
    let controller = CacheController::new(config("v1"), store.clone(), fetcher);

    controller.install().await.expect_err("install must fail");
    assert_eq!(store.partition_len("app-static-v1"), None);
}
