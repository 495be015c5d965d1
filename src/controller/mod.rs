//! The cache controller.
//!
//! One long-lived controller instance owns the partition store and decides,
//! per intercepted request, whether to serve from a partition, fetch fresh,
//! or both. It walks the lifecycle `installing → waiting → active`; a fresh
//! install immediately supersedes any waiting predecessor so new app-shell
//! assets take effect without a restart.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::CacheSettings;
use crate::domain::{
    ControlMessage, FetchRequest, PartitionRole, PartitionSet, ResponseSnapshot, SnapshotKey,
};
use crate::store::lock::{rw_read, rw_write};
use crate::store::{PartitionStore, StoreError};

pub mod events;
pub mod rules;
mod strategy;

pub use events::{
    ControllerError, DispatchError, EventLoop, EventLoopHandle, EventOutcome, WorkerEvent,
};
pub use rules::{Classifier, RequestClass};

use strategy::StrategyCtx;

const SOURCE: &str = "controller";

const METRIC_INSTALL_FAILED: &str = "scorta_install_failed_total";
const METRIC_PARTITIONS_DELETED: &str = "scorta_partitions_deleted_total";
const METRIC_REFRESH_WIPE: &str = "scorta_refresh_wipe_total";

/// How many broadcast messages a slow client may lag behind before missing some.
const CLIENT_CHANNEL_CAPACITY: usize = 16;

/// Whether a network fetch may consult intermediary caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Default,
    /// Freshness-critical fetches: bypass every intermediary cache.
    NoStore,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {message}")]
    Network { message: String },
    #[error("malformed request: {message}")]
    Request { message: String },
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }
}

/// Upstream network access, injected so strategies can be exercised without
/// a live origin.
#[async_trait]
pub trait NetworkFetcher: Send + Sync {
    async fn fetch(
        &self,
        request: &FetchRequest,
        mode: CacheMode,
    ) -> Result<ResponseSnapshot, FetchError>;
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("manifest path `{path}` is not a valid url: {reason}")]
    Manifest { path: String, reason: String },
    #[error("failed to fetch app-shell asset `{path}`: {source}")]
    Fetch {
        path: String,
        #[source]
        source: FetchError,
    },
    #[error("app-shell asset `{path}` returned status {status}")]
    Asset { path: String, status: u16 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Controller lifecycle. A superseded controller simply stops being
/// referenced; there is no explicit terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Installing,
    Waiting,
    Active,
}

/// Broadcast channel from the controller to every connected page.
#[derive(Clone)]
pub struct ClientHub {
    sender: broadcast::Sender<ControlMessage>,
}

impl ClientHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CLIENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlMessage> {
        self.sender.subscribe()
    }

    /// Deliver a message to every subscribed client; returns how many
    /// received it. No subscribers is not an error.
    pub fn broadcast(&self, message: ControlMessage) -> usize {
        self.sender.send(message).unwrap_or(0)
    }
}

impl Default for ClientHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration the controller is constructed from.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub origin: Url,
    pub app_prefix: String,
    pub generation: String,
    pub static_manifest: Vec<String>,
    pub api_prefix: String,
    pub image_prefixes: Vec<String>,
}

impl ControllerConfig {
    pub fn from_settings(cache: &CacheSettings, origin: Url) -> Self {
        Self {
            origin,
            app_prefix: cache.app_prefix.clone(),
            generation: cache.generation.clone(),
            static_manifest: cache.static_manifest.clone(),
            api_prefix: cache.api_prefix.clone(),
            image_prefixes: cache.image_prefixes.clone(),
        }
    }
}

/// Result of dispatching an intercepted request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The controller declines; the host forwards to the network untouched.
    Passthrough,
    /// The controller resolved a response (cached, fresh, or synthetic).
    Response(ResponseSnapshot),
}

pub struct CacheController {
    origin: Url,
    partitions: PartitionSet,
    manifest: Vec<String>,
    classifier: Classifier,
    store: Arc<dyn PartitionStore>,
    fetcher: Arc<dyn NetworkFetcher>,
    state: RwLock<LifecycleState>,
    clients: ClientHub,
}

impl CacheController {
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn PartitionStore>,
        fetcher: Arc<dyn NetworkFetcher>,
    ) -> Self {
        let partitions = PartitionSet::new(config.app_prefix, config.generation);
        let classifier = Classifier::new(
            config.origin.clone(),
            config.api_prefix,
            config.image_prefixes,
        );
        Self {
            origin: config.origin,
            partitions,
            manifest: config.static_manifest,
            classifier,
            store,
            fetcher,
            state: RwLock::new(LifecycleState::Installing),
            clients: ClientHub::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *rw_read(&self.state, SOURCE, "state")
    }

    fn set_state(&self, next: LifecycleState) {
        *rw_write(&self.state, SOURCE, "set_state") = next;
    }

    pub fn partitions(&self) -> &PartitionSet {
        &self.partitions
    }

    /// Subscribe to controller broadcasts, as a connected page would.
    pub fn subscribe(&self) -> broadcast::Receiver<ControlMessage> {
        self.clients.subscribe()
    }

    /// Pre-populate the static partition with the app-shell manifest.
    ///
    /// All-or-nothing: every asset is fetched before anything is written, so
    /// a failed install leaves the store exactly as it was and the previous
    /// generation keeps serving.
    pub async fn install(&self) -> Result<(), InstallError> {
        self.set_state(LifecycleState::Installing);

        let mut shell = Vec::with_capacity(self.manifest.len());
        for path in &self.manifest {
            let url = self
                .origin
                .join(path)
                .map_err(|error| InstallError::Manifest {
                    path: path.clone(),
                    reason: error.to_string(),
                })?;
            let request = FetchRequest::get(url);
            let snapshot = self
                .fetcher
                .fetch(&request, CacheMode::Default)
                .await
                .map_err(|source| {
                    counter!(METRIC_INSTALL_FAILED).increment(1);
                    InstallError::Fetch {
                        path: path.clone(),
                        source,
                    }
                })?;
            if !snapshot.is_success() {
                counter!(METRIC_INSTALL_FAILED).increment(1);
                return Err(InstallError::Asset {
                    path: path.clone(),
                    status: snapshot.status.as_u16(),
                });
            }
            shell.push((request.key(), snapshot));
        }

        let static_partition = self.partitions.name(PartitionRole::Static);
        for (key, snapshot) in shell {
            self.store.put(&static_partition, key, snapshot).await?;
        }

        // Skip the wait-for-all-pages-closed step: a completed install is
        // immediately eligible for activation.
        self.set_state(LifecycleState::Waiting);
        info!(
            generation = self.partitions.generation(),
            assets = self.manifest.len(),
            "app shell installed"
        );
        Ok(())
    }

    /// Generation rollover: delete every partition not named by the current
    /// generation, then begin intercepting requests.
    pub async fn activate(&self) -> Result<(), StoreError> {
        let names = self.store.list_names().await?;
        let mut deleted = 0u64;
        for name in names {
            if self.partitions.contains(&name) {
                continue;
            }
            if self.store.delete_partition(&name).await? {
                debug!(partition = %name, "deleted stale partition");
                deleted += 1;
            }
        }
        if deleted > 0 {
            counter!(METRIC_PARTITIONS_DELETED).increment(deleted);
        }

        self.set_state(LifecycleState::Active);
        info!(
            generation = self.partitions.generation(),
            stale_partitions_deleted = deleted,
            "controller active"
        );
        Ok(())
    }

    /// Resolve one intercepted request.
    ///
    /// Infallible by design: strategies absorb network and store failures
    /// into per-class fallbacks, so the page never sees an uncaught error.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> FetchOutcome {
        if self.state() != LifecycleState::Active {
            return FetchOutcome::Passthrough;
        }

        let ctx = StrategyCtx {
            store: self.store.as_ref(),
            fetcher: self.fetcher.as_ref(),
            partitions: &self.partitions,
            origin: &self.origin,
        };

        match self.classifier.classify(request) {
            RequestClass::Passthrough => FetchOutcome::Passthrough,
            RequestClass::Api => FetchOutcome::Response(ctx.api_network_only(request).await),
            RequestClass::Image => FetchOutcome::Response(ctx.image_cache_first(request).await),
            RequestClass::Navigation => {
                FetchOutcome::Response(ctx.navigation_network_first(request).await)
            }
            RequestClass::StaticAsset => {
                FetchOutcome::Response(ctx.static_cache_first(request).await)
            }
        }
    }

    /// Handle a control message from a page.
    ///
    /// `REFRESH_CACHE` wipes every partition under the app prefix — all
    /// generations, deliberately broader than activation's rollover GC —
    /// and always answers with a single `CACHE_REFRESHED` broadcast, even
    /// when parts of the wipe failed.
    pub async fn handle_message(&self, message: ControlMessage) {
        match message {
            ControlMessage::RefreshCache => {
                self.wipe_app_partitions().await;
                let receivers = self.clients.broadcast(ControlMessage::CacheRefreshed);
                debug!(receivers, "cache refresh acknowledged");
            }
            ControlMessage::CacheRefreshed => {
                // Broadcast echo looped back through the message channel.
                debug!("ignoring CACHE_REFRESHED sent to the controller");
            }
        }
    }

    async fn wipe_app_partitions(&self) {
        let names = match self.store.list_names().await {
            Ok(names) => names,
            Err(error) => {
                warn!(error = %error, "refresh wipe could not enumerate partitions");
                return;
            }
        };

        let mut wiped = 0u64;
        for name in names {
            if !self.partitions.owned_by_app(&name) {
                continue;
            }
            match self.store.delete_partition(&name).await {
                Ok(true) => wiped += 1,
                Ok(false) => {}
                Err(error) => {
                    warn!(partition = %name, error = %error, "refresh wipe failed for partition")
                }
            }
        }
        counter!(METRIC_REFRESH_WIPE).increment(1);
        info!(partitions_wiped = wiped, "refresh wipe completed");
    }

    /// The navigation fallback key, exposed for seeding tests.
    pub fn root_key(&self) -> SnapshotKey {
        SnapshotKey::root(&self.origin)
    }
}
