//! Per-class caching strategies.
//!
//! Each strategy resolves a classified request to a response snapshot and
//! never surfaces an error to the caller: network failures degrade to the
//! class-specific fallback, store failures degrade to the network path.
//! Within one call the lookup → fetch → write-back sequence is strictly
//! ordered; nothing is guaranteed across concurrent calls.

use metrics::counter;
use tracing::{debug, warn};
use url::Url;

use crate::domain::{FetchRequest, PartitionRole, PartitionSet, ResponseSnapshot, SnapshotKey};
use crate::store::PartitionStore;

use super::{CacheMode, NetworkFetcher};

const METRIC_CACHE_HIT: &str = "scorta_cache_hit_total";
const METRIC_CACHE_MISS: &str = "scorta_cache_miss_total";
const METRIC_CACHE_FILL: &str = "scorta_cache_fill_total";
const METRIC_OFFLINE_FALLBACK: &str = "scorta_offline_fallback_total";

/// Dependencies a strategy runs against, borrowed from the controller.
pub(crate) struct StrategyCtx<'a> {
    pub store: &'a dyn PartitionStore,
    pub fetcher: &'a dyn NetworkFetcher,
    pub partitions: &'a PartitionSet,
    pub origin: &'a Url,
}

impl StrategyCtx<'_> {
    /// Network-only with offline fallback. API responses are never written
    /// to any partition: staleness there would corrupt application state.
    pub(crate) async fn api_network_only(&self, request: &FetchRequest) -> ResponseSnapshot {
        match self.fetcher.fetch(request, CacheMode::NoStore).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                debug!(path = request.path(), error = %error, "api fetch failed, serving offline notice");
                counter!(METRIC_OFFLINE_FALLBACK, "class" => "api").increment(1);
                ResponseSnapshot::offline_api()
            }
        }
    }

    /// Cache-first against the images partition; synthetic 404 when both
    /// the partition and the network come up empty.
    pub(crate) async fn image_cache_first(&self, request: &FetchRequest) -> ResponseSnapshot {
        let partition = self.partitions.name(PartitionRole::Images);
        let key = request.key();

        if let Some(snapshot) = self.lookup(&partition, &key, PartitionRole::Images).await {
            return snapshot;
        }

        match self.fetcher.fetch(request, CacheMode::Default).await {
            Ok(snapshot) => {
                self.write_back(&partition, key, &snapshot, PartitionRole::Images)
                    .await;
                snapshot
            }
            Err(error) => {
                debug!(path = request.path(), error = %error, "image fetch failed with no cached entry");
                counter!(METRIC_OFFLINE_FALLBACK, "class" => "image").increment(1);
                ResponseSnapshot::missing_image()
            }
        }
    }

    /// Network-first against the dynamic partition. Fallback chain on
    /// network failure: exact URL entry, then the cached root document,
    /// then a synthetic 503.
    pub(crate) async fn navigation_network_first(
        &self,
        request: &FetchRequest,
    ) -> ResponseSnapshot {
        let partition = self.partitions.name(PartitionRole::Dynamic);
        let key = request.key();

        match self.fetcher.fetch(request, CacheMode::NoStore).await {
            Ok(snapshot) => {
                self.write_back(&partition, key, &snapshot, PartitionRole::Dynamic)
                    .await;
                return snapshot;
            }
            Err(error) => {
                debug!(path = request.path(), error = %error, "navigation fetch failed, trying cached fallbacks");
            }
        }

        if let Some(snapshot) = self.lookup(&partition, &key, PartitionRole::Dynamic).await {
            return snapshot;
        }

        let root = SnapshotKey::root(self.origin);
        if let Some(snapshot) = self.lookup(&partition, &root, PartitionRole::Dynamic).await {
            debug!(path = request.path(), "serving cached root document as navigation fallback");
            return snapshot;
        }
        // The app shell root pre-cached at install time also qualifies.
        let static_partition = self.partitions.name(PartitionRole::Static);
        if let Some(snapshot) = self
            .lookup(&static_partition, &root, PartitionRole::Static)
            .await
        {
            debug!(path = request.path(), "serving app-shell root as navigation fallback");
            return snapshot;
        }

        counter!(METRIC_OFFLINE_FALLBACK, "class" => "navigation").increment(1);
        ResponseSnapshot::offline_page()
    }

    /// Cache-first against the static partition, filled on miss.
    pub(crate) async fn static_cache_first(&self, request: &FetchRequest) -> ResponseSnapshot {
        let partition = self.partitions.name(PartitionRole::Static);
        let key = request.key();

        if let Some(snapshot) = self.lookup(&partition, &key, PartitionRole::Static).await {
            return snapshot;
        }

        match self.fetcher.fetch(request, CacheMode::Default).await {
            Ok(snapshot) => {
                self.write_back(&partition, key, &snapshot, PartitionRole::Static)
                    .await;
                snapshot
            }
            Err(error) => {
                debug!(path = request.path(), error = %error, "static asset fetch failed with no cached entry");
                counter!(METRIC_OFFLINE_FALLBACK, "class" => "static").increment(1);
                ResponseSnapshot::offline_page()
            }
        }
    }

    /// Partition lookup. Store failures read as a miss so the surrounding
    /// fetch falls through to its network path.
    async fn lookup(
        &self,
        partition: &str,
        key: &SnapshotKey,
        role: PartitionRole,
    ) -> Option<ResponseSnapshot> {
        match self.store.get(partition, key).await {
            Ok(Some(snapshot)) => {
                counter!(METRIC_CACHE_HIT, "partition" => role.as_str()).increment(1);
                debug!(
                    partition,
                    key = key.url(),
                    age_seconds = snapshot.age().whole_seconds(),
                    "serving cached snapshot"
                );
                Some(snapshot)
            }
            Ok(None) => {
                counter!(METRIC_CACHE_MISS, "partition" => role.as_str()).increment(1);
                None
            }
            Err(error) => {
                warn!(partition, error = %error, "partition read failed, treating as miss");
                None
            }
        }
    }

    /// Write a successful response into a partition. The snapshot handed to
    /// the caller stays untouched; a clone is stored. Failed responses are
    /// never written.
    async fn write_back(
        &self,
        partition: &str,
        key: SnapshotKey,
        snapshot: &ResponseSnapshot,
        role: PartitionRole,
    ) {
        if !snapshot.is_success() {
            return;
        }
        if let Err(error) = self.store.put(partition, key, snapshot.clone()).await {
            warn!(partition, error = %error, "partition write failed, response served uncached");
            return;
        }
        counter!(METRIC_CACHE_FILL, "partition" => role.as_str()).increment(1);
    }
}
