//! Foreground refresh coordination.
//!
//! A page that regains foreground visibility must not keep showing stale
//! cached data. When the app runs in an installed/standalone display mode,
//! regaining visibility or focus triggers the refresh protocol: ask the
//! controller to wipe its partitions, wait for the acknowledgement or a
//! bounded timeout, and then reload unconditionally. The cache refresh is a
//! best-effort precursor to the reload, never a blocking requirement.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::config::CacheSettings;
use crate::controller::CacheController;
use crate::domain::ControlMessage;

/// Bounded wait for the `CACHE_REFRESHED` acknowledgement.
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

/// How the app is being displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Ordinary browser tab; the coordinator stays disarmed.
    Browser,
    /// Home-screen-launched app without browser chrome.
    Standalone,
}

/// Host hook that discards the page, including any unsaved UI state.
pub trait PageReload: Send + Sync {
    fn reload(&self);
}

pub struct RefreshCoordinator {
    controller: Option<Arc<CacheController>>,
    display_mode: DisplayMode,
    timeout: Duration,
    reload: Arc<dyn PageReload>,
}

impl RefreshCoordinator {
    /// `controller` is `None` when no controller is active or the host has
    /// no background caching capability at all; the coordinator then
    /// resolves immediately and still reloads.
    pub fn new(
        controller: Option<Arc<CacheController>>,
        display_mode: DisplayMode,
        reload: Arc<dyn PageReload>,
    ) -> Self {
        Self {
            controller,
            display_mode,
            timeout: REFRESH_TIMEOUT,
            reload,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build a coordinator bound to the configured acknowledgement window.
    pub fn from_settings(
        controller: Option<Arc<CacheController>>,
        display_mode: DisplayMode,
        reload: Arc<dyn PageReload>,
        cache: &CacheSettings,
    ) -> Self {
        Self::new(controller, display_mode, reload).with_timeout(cache.refresh_timeout)
    }

    /// Page visibility transitioned from hidden to visible.
    pub async fn on_visibility_regained(&self) {
        self.on_foreground().await;
    }

    /// The window received focus.
    pub async fn on_focus(&self) {
        self.on_foreground().await;
    }

    async fn on_foreground(&self) {
        if self.display_mode != DisplayMode::Standalone {
            debug!("not running standalone, skipping foreground refresh");
            return;
        }
        self.refresh().await;
        // Reload is unconditional: refreshed, timed out, or no controller.
        self.reload.reload();
    }

    async fn refresh(&self) {
        let Some(controller) = &self.controller else {
            debug!("no active controller, proceeding as refreshed");
            return;
        };

        // Subscribe before sending so the acknowledgement cannot be missed.
        let mut acknowledgements = controller.subscribe();

        // The request is detached from the wait: timing out below stops the
        // wait but never cancels the underlying partition deletion.
        let sender = Arc::clone(controller);
        tokio::spawn(async move {
            sender.handle_message(ControlMessage::RefreshCache).await;
        });

        let wait = async {
            loop {
                match acknowledgements.recv().await {
                    Ok(ControlMessage::CacheRefreshed) => break,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "lagged behind controller broadcasts");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };

        if tokio::time::timeout(self.timeout, wait).await.is_err() {
            warn!(
                timeout_ms = self.timeout.as_millis() as u64,
                "cache refresh acknowledgement timed out, reloading anyway"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::http::StatusCode;
    use bytes::Bytes;
    use url::Url;

    use crate::controller::{
        CacheMode, ControllerConfig, FetchError, NetworkFetcher,
    };
    use crate::domain::{FetchRequest, ResponseSnapshot};
    use crate::store::MemoryStore;

    use super::*;

    #[derive(Default)]
    struct ReloadCounter {
        reloads: AtomicUsize,
    }

    impl PageReload for ReloadCounter {
        fn reload(&self) {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ReloadCounter {
        fn count(&self) -> usize {
            self.reloads.load(Ordering::SeqCst)
        }
    }

    struct OkFetcher;

    #[async_trait]
    impl NetworkFetcher for OkFetcher {
        async fn fetch(
            &self,
            _request: &FetchRequest,
            _mode: CacheMode,
        ) -> Result<ResponseSnapshot, FetchError> {
            Ok(ResponseSnapshot::new(
                StatusCode::OK,
                Vec::new(),
                Bytes::from_static(b"ok"),
            ))
        }
    }

    fn controller() -> Arc<CacheController> {
        Arc::new(CacheController::new(
            ControllerConfig {
                origin: Url::parse("http://127.0.0.1:3000").expect("origin"),
                app_prefix: "app".to_string(),
                generation: "v1".to_string(),
                static_manifest: vec!["/".to_string()],
                api_prefix: "/api/".to_string(),
                image_prefixes: vec!["/uploads/".to_string()],
            },
            Arc::new(MemoryStore::new()),
            Arc::new(OkFetcher),
        ))
    }

    #[tokio::test]
    async fn browser_tab_mode_never_reloads() {
        let reload = Arc::new(ReloadCounter::default());
        let coordinator = RefreshCoordinator::new(
            Some(controller()),
            DisplayMode::Browser,
            reload.clone(),
        );

        coordinator.on_visibility_regained().await;
        coordinator.on_focus().await;
        assert_eq!(reload.count(), 0);
    }

    #[tokio::test]
    async fn standalone_refresh_reloads_after_acknowledgement() {
        let reload = Arc::new(ReloadCounter::default());
        let coordinator = RefreshCoordinator::new(
            Some(controller()),
            DisplayMode::Standalone,
            reload.clone(),
        );

        coordinator.on_visibility_regained().await;
        assert_eq!(reload.count(), 1);
    }

    #[tokio::test]
    async fn missing_controller_still_reloads_immediately() {
        let reload = Arc::new(ReloadCounter::default());
        let coordinator =
            RefreshCoordinator::new(None, DisplayMode::Standalone, reload.clone());

        coordinator.on_focus().await;
        assert_eq!(reload.count(), 1);
    }

    #[tokio::test]
    async fn settings_bound_the_acknowledgement_wait() {
        let cache = CacheSettings {
            app_prefix: "app".to_string(),
            generation: "v1".to_string(),
            static_manifest: vec!["/".to_string()],
            api_prefix: "/api/".to_string(),
            image_prefixes: vec!["/uploads/".to_string()],
            refresh_timeout: Duration::from_millis(250),
        };

        let reload = Arc::new(ReloadCounter::default());
        let coordinator = RefreshCoordinator::from_settings(
            None,
            DisplayMode::Standalone,
            reload.clone(),
            &cache,
        );

        assert_eq!(coordinator.timeout, Duration::from_millis(250));
        coordinator.on_focus().await;
        assert_eq!(reload.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_without_acknowledgement_still_reloads() {
        use crate::domain::SnapshotKey;
        use crate::store::{PartitionStore, StoreError};

        // A store whose wipe never completes, so the acknowledgement never
        // arrives. Paused time advances past the 5s bound instantly.
        struct HangingStore;

        #[async_trait]
        impl PartitionStore for HangingStore {
            async fn get(
                &self,
                _partition: &str,
                _key: &SnapshotKey,
            ) -> Result<Option<ResponseSnapshot>, StoreError> {
                Ok(None)
            }
            async fn put(
                &self,
                _partition: &str,
                _key: SnapshotKey,
                _snapshot: ResponseSnapshot,
            ) -> Result<(), StoreError> {
                Ok(())
            }
            async fn delete(
                &self,
                _partition: &str,
                _key: &SnapshotKey,
            ) -> Result<bool, StoreError> {
                Ok(false)
            }
            async fn list_names(&self) -> Result<Vec<String>, StoreError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
            async fn delete_partition(&self, _name: &str) -> Result<bool, StoreError> {
                Ok(false)
            }
        }

        let controller = Arc::new(CacheController::new(
            ControllerConfig {
                origin: Url::parse("http://127.0.0.1:3000").expect("origin"),
                app_prefix: "app".to_string(),
                generation: "v1".to_string(),
                static_manifest: vec!["/".to_string()],
                api_prefix: "/api/".to_string(),
                image_prefixes: vec!["/uploads/".to_string()],
            },
            Arc::new(HangingStore),
            Arc::new(OkFetcher),
        ));

        let reload = Arc::new(ReloadCounter::default());
        let coordinator = RefreshCoordinator::new(
            Some(controller),
            DisplayMode::Standalone,
            reload.clone(),
        )
        .with_timeout(REFRESH_TIMEOUT);

        coordinator.on_visibility_regained().await;
        assert_eq!(reload.count(), 1);
    }
}
