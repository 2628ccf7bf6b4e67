#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! TTL-bounded incident snapshot store.
//!
//! [`IncidentStore`] owns the resident [`CacheSnapshot`]. A load returns
//! the in-memory snapshot while it is fresh, otherwise adopts a fresh
//! durable copy, otherwise fetches from the remote feed and persists the
//! result. Refreshes swap the snapshot reference atomically, so readers see
//! either the old or the new dataset in full. Concurrent refreshes collapse
//! into a single in-flight fetch whose result every waiter shares.

pub mod paths;
pub mod storage;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use crime_radius_incident_models::CacheSnapshot;
use crime_radius_source::{FetchError, FetchOptions, IncidentSource};
use futures::FutureExt as _;
use futures::future::{BoxFuture, Shared};

pub use storage::{FileSnapshotStorage, MemorySnapshotStorage, SnapshotStorage};

/// Default snapshot time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default fetch window in days.
pub const DEFAULT_WINDOW_DAYS: u32 = 180;

/// Default cap on records per fetch.
pub const DEFAULT_MAX_RECORDS: u64 = 50_000;

/// Errors writing or reading the durable snapshot.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// I/O error (file read/write/rename).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The blocking encode/decode task did not complete.
    #[error("Snapshot task failed: {message}")]
    Task {
        /// Description of what went wrong.
        message: String,
    },
}

/// Errors from [`IncidentStore::load`].
///
/// Cloneable so that every caller waiting on a shared refresh receives the
/// same error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The remote fetch failed; the previous snapshot is still resident.
    #[error("Incident fetch failed: {0}")]
    Fetch(Arc<FetchError>),

    /// The refresh task panicked or was cancelled.
    #[error("Refresh aborted: {message}")]
    Aborted {
        /// Description of what went wrong.
        message: String,
    },
}

/// Tuning knobs for [`IncidentStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// Maximum snapshot age before a load re-fetches.
    pub ttl: Duration,
    /// How many days back each fetch reaches.
    pub window_days: u32,
    /// Upper bound on records per fetch.
    pub max_records: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            window_days: DEFAULT_WINDOW_DAYS,
            max_records: DEFAULT_MAX_RECORDS,
        }
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<Arc<CacheSnapshot>, StoreError>>>;

struct StoreInner {
    source: Arc<dyn IncidentSource>,
    storage: Arc<dyn SnapshotStorage>,
    settings: StoreSettings,
    snapshot: RwLock<Option<Arc<CacheSnapshot>>>,
    in_flight: Mutex<Option<SharedRefresh>>,
}

/// Owner of the resident incident snapshot.
///
/// Cheap to clone; clones share the same snapshot and refresh state.
#[derive(Clone)]
pub struct IncidentStore {
    inner: Arc<StoreInner>,
}

impl IncidentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(
        source: Arc<dyn IncidentSource>,
        storage: Arc<dyn SnapshotStorage>,
        settings: StoreSettings,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                source,
                storage,
                settings,
                snapshot: RwLock::new(None),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// The store's settings.
    #[must_use]
    pub fn settings(&self) -> StoreSettings {
        self.inner.settings
    }

    /// Returns a fresh snapshot, loading one if needed.
    ///
    /// Without `force`, a fresh resident snapshot is returned without any
    /// I/O, and a fresh durable copy is adopted without a remote fetch.
    /// With `force`, the remote feed is always consulted unless a refresh
    /// is already in flight, in which case its result is shared.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Fetch`] if the remote fetch fails. The
    /// previously resident snapshot, if any, stays in place.
    pub async fn load(&self, force: bool) -> Result<Arc<CacheSnapshot>, StoreError> {
        if !force && let Some(snapshot) = self.inner.fresh() {
            return Ok(snapshot);
        }
        self.join_refresh(force).await
    }

    /// The resident snapshot, fresh or not. `None` before the first
    /// successful load.
    #[must_use]
    pub fn current(&self) -> Option<Arc<CacheSnapshot>> {
        self.inner.current()
    }

    /// Age of the resident snapshot.
    #[must_use]
    pub fn age(&self) -> Option<Duration> {
        self.current().map(|s| s.age(Utc::now()))
    }

    /// Whether a load would need to refresh: nothing resident, or the
    /// resident snapshot has outlived its TTL.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.inner.fresh().is_none()
    }

    /// Whether a refresh is currently in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        lock(&self.inner.in_flight).is_some()
    }

    fn join_refresh(&self, force: bool) -> SharedRefresh {
        let mut slot = lock(&self.inner.in_flight);
        if let Some(existing) = slot.as_ref() {
            log::debug!("Joining in-flight incident refresh");
            return existing.clone();
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _clear = ClearInFlight(Arc::clone(&inner));
            inner.refresh(force).await
        });

        let shared = async move {
            task.await.unwrap_or_else(|e| {
                Err(StoreError::Aborted {
                    message: e.to_string(),
                })
            })
        }
        .boxed()
        .shared();

        *slot = Some(shared.clone());
        shared
    }
}

/// Clears the in-flight slot when the refresh task ends, even by panic.
struct ClearInFlight(Arc<StoreInner>);

impl Drop for ClearInFlight {
    fn drop(&mut self) {
        *lock(&self.0.in_flight) = None;
    }
}

impl StoreInner {
    fn current(&self) -> Option<Arc<CacheSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fresh(&self) -> Option<Arc<CacheSnapshot>> {
        self.current()
            .filter(|s| s.is_fresh(Utc::now(), self.settings.ttl))
    }

    fn install(&self, snapshot: CacheSnapshot) -> Arc<CacheSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&snapshot));
        snapshot
    }

    async fn refresh(&self, force: bool) -> Result<Arc<CacheSnapshot>, StoreError> {
        if !force {
            // Another refresh may have completed since the caller checked.
            if let Some(snapshot) = self.fresh() {
                return Ok(snapshot);
            }
            if let Some(snapshot) = self.read_durable().await {
                return Ok(self.install(snapshot));
            }
        }

        let snapshot = self.install(self.fetch_remote().await?);

        match self.storage.write(Arc::clone(&snapshot)).await {
            Ok(()) => log::info!("Saved {} incidents to durable cache", snapshot.len()),
            Err(e) => log::error!("Failed to persist incident snapshot, keeping last good copy: {e}"),
        }

        Ok(snapshot)
    }

    async fn read_durable(&self) -> Option<CacheSnapshot> {
        let now = Utc::now();
        let ttl = self.settings.ttl;

        if let Some(modified) = self.storage.modified().await
            && (now - modified).to_std().is_ok_and(|age| age >= ttl)
        {
            log::info!("Durable incident cache expired, fetching fresh data...");
            return None;
        }

        match self.storage.read().await {
            Ok(Some(snapshot)) if snapshot.is_fresh(now, ttl) => {
                log::info!(
                    "Loaded {} incidents from durable cache ({} minutes old)",
                    snapshot.len(),
                    snapshot.age(now).as_secs() / 60
                );
                Some(snapshot)
            }
            Ok(Some(_)) => {
                log::info!("Durable incident cache expired, fetching fresh data...");
                None
            }
            Ok(None) => {
                log::info!("No durable incident cache found, downloading for the first time...");
                None
            }
            Err(e) => {
                log::warn!("Error reading durable incident cache, fetching fresh data: {e}");
                None
            }
        }
    }

    async fn fetch_remote(&self) -> Result<CacheSnapshot, StoreError> {
        let options = FetchOptions::window(
            Utc::now(),
            self.settings.window_days,
            self.settings.max_records,
        );
        log::info!(
            "Fetching incidents from {} (last {} days, up to {} records)...",
            self.source.id(),
            self.settings.window_days,
            options.limit
        );

        let records = self.source.fetch(&options).await.map_err(|e| {
            log::error!("Error fetching incidents from {}: {e}", self.source.id());
            StoreError::Fetch(Arc::new(e))
        })?;

        let snapshot = CacheSnapshot::new(records, Utc::now());
        log::info!(
            "Incident data loaded: {} incidents ({} with coordinates)",
            snapshot.len(),
            snapshot.indexable().count()
        );
        Ok(snapshot)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use crime_radius_incident_models::IncidentRecord;
    use serde_json::{Map, Value, json};
    use tokio::sync::Semaphore;

    use crate::storage::MemorySnapshotStorage;

    /// Feed double that counts fetches and can be held open or made to fail.
    struct CountingSource {
        calls: AtomicUsize,
        records: Vec<IncidentRecord>,
        fail: AtomicBool,
        gate: Option<Semaphore>,
    }

    impl CountingSource {
        fn new(records: Vec<IncidentRecord>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                records,
                fail: AtomicBool::new(false),
                gate: None,
            }
        }

        fn gated(records: Vec<IncidentRecord>) -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::new(records)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.add_permits(1);
            }
        }
    }

    #[async_trait]
    impl IncidentSource for CountingSource {
        fn id(&self) -> &str {
            "counting"
        }

        async fn fetch(&self, _options: &FetchOptions) -> Result<Vec<IncidentRecord>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(FetchError::Malformed {
                    message: "feed down".to_string(),
                });
            }
            Ok(self.records.clone())
        }
    }

    /// Storage double whose writes always fail.
    struct BrokenStorage;

    #[async_trait]
    impl SnapshotStorage for BrokenStorage {
        async fn modified(&self) -> Option<chrono::DateTime<Utc>> {
            None
        }

        async fn read(&self) -> Result<Option<CacheSnapshot>, PersistError> {
            Ok(None)
        }

        async fn write(&self, _snapshot: Arc<CacheSnapshot>) -> Result<(), PersistError> {
            Err(PersistError::Io(std::io::Error::other("disk full")))
        }
    }

    fn record(id: &str, lat: &str, lon: &str) -> IncidentRecord {
        let Value::Object(fields) = json!({ "incident_id": id, "latitude": lat, "longitude": lon })
        else {
            unreachable!()
        };
        IncidentRecord::from_fields(fields, 0)
    }

    fn sample_records() -> Vec<IncidentRecord> {
        vec![
            record("1", "37.7750", "-122.4195"),
            record("2", "37.8044", "-122.2712"),
        ]
    }

    fn aged_snapshot(hours: i64) -> CacheSnapshot {
        CacheSnapshot::new(
            vec![record("old", "37.7", "-122.4")],
            Utc::now() - chrono::TimeDelta::hours(hours),
        )
    }

    fn store_with(
        source: &Arc<CountingSource>,
        storage: Arc<dyn SnapshotStorage>,
    ) -> IncidentStore {
        let source: Arc<dyn IncidentSource> = Arc::<CountingSource>::clone(source);
        IncidentStore::new(source, storage, StoreSettings::default())
    }

    #[tokio::test]
    async fn first_load_fetches_and_persists() {
        let source = Arc::new(CountingSource::new(sample_records()));
        let storage = Arc::new(MemorySnapshotStorage::new());
        let store = store_with(&source, storage.clone());

        assert!(store.current().is_none());
        assert!(store.age().is_none());
        assert!(store.is_stale());

        let snapshot = store.load(false).await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(source.calls(), 1);
        assert_eq!(storage.write_count(), 1);
        assert!(Arc::ptr_eq(&storage.stored().unwrap(), &snapshot));
        assert!(!store.is_stale());
        assert!(store.age().unwrap() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn fresh_resident_snapshot_skips_io() {
        let source = Arc::new(CountingSource::new(sample_records()));
        let storage = Arc::new(MemorySnapshotStorage::new());
        let store = store_with(&source, storage.clone());

        let first = store.load(false).await.unwrap();
        let second = store.load(false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls(), 1);
        assert_eq!(storage.write_count(), 1);
    }

    #[tokio::test]
    async fn durable_snapshot_one_hour_old_is_adopted() {
        let source = Arc::new(CountingSource::new(sample_records()));
        let storage = Arc::new(MemorySnapshotStorage::seeded(aged_snapshot(1)));
        let store = store_with(&source, storage.clone());

        let snapshot = store.load(false).await.unwrap();
        assert_eq!(source.calls(), 0);
        assert!(snapshot.get("old").is_some());
        assert_eq!(storage.write_count(), 0);
    }

    #[tokio::test]
    async fn durable_snapshot_twenty_five_hours_old_triggers_fetch() {
        let source = Arc::new(CountingSource::new(sample_records()));
        let storage = Arc::new(MemorySnapshotStorage::seeded(aged_snapshot(25)));
        let store = store_with(&source, storage.clone());

        let snapshot = store.load(false).await.unwrap();
        assert_eq!(source.calls(), 1);
        assert!(snapshot.get("old").is_none());
        assert_eq!(snapshot.len(), 2);
        assert_eq!(storage.write_count(), 1);
    }

    #[tokio::test]
    async fn forced_load_refetches_fresh_snapshot() {
        let source = Arc::new(CountingSource::new(sample_records()));
        let storage = Arc::new(MemorySnapshotStorage::seeded(aged_snapshot(1)));
        let store = store_with(&source, storage);

        store.load(false).await.unwrap();
        assert_eq!(source.calls(), 0);

        let snapshot = store.load(true).await.unwrap();
        assert_eq!(source.calls(), 1);
        assert!(snapshot.get("1").is_some());
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_snapshot() {
        let source = Arc::new(CountingSource::new(sample_records()));
        let store = store_with(&source, Arc::new(MemorySnapshotStorage::new()));

        let before = store.load(false).await.unwrap();
        source.fail.store(true, Ordering::SeqCst);

        let err = store.load(true).await.unwrap_err();
        assert!(matches!(err, StoreError::Fetch(_)));
        assert!(Arc::ptr_eq(&store.current().unwrap(), &before));
        assert!(!store.is_refreshing());
    }

    #[tokio::test]
    async fn failed_first_fetch_leaves_store_empty() {
        let source = Arc::new(CountingSource::new(sample_records()));
        source.fail.store(true, Ordering::SeqCst);
        let store = store_with(&source, Arc::new(MemorySnapshotStorage::new()));

        assert!(store.load(false).await.is_err());
        assert!(store.current().is_none());
    }

    #[tokio::test]
    async fn persist_failure_does_not_fail_load() {
        let source = Arc::new(CountingSource::new(sample_records()));
        let store = store_with(&source, Arc::new(BrokenStorage));

        let snapshot = store.load(false).await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(store.current().is_some());
    }

    async fn wait_for_calls(source: &CountingSource, expected: usize) {
        while source.calls() < expected {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_fetch() {
        let source = Arc::new(CountingSource::gated(sample_records()));
        let store = store_with(&source, Arc::new(MemorySnapshotStorage::new()));

        let first = tokio::spawn({
            let store = store.clone();
            async move { store.load(false).await }
        });
        wait_for_calls(&source, 1).await;
        assert!(store.is_refreshing());

        let second = tokio::spawn({
            let store = store.clone();
            async move { store.load(true).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        source.release();
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls(), 1);
        assert!(!store.is_refreshing());
    }

    #[tokio::test]
    async fn concurrent_waiters_share_a_failure() {
        let source = Arc::new(CountingSource::gated(sample_records()));
        source.fail.store(true, Ordering::SeqCst);
        let store = store_with(&source, Arc::new(MemorySnapshotStorage::new()));

        let first = tokio::spawn({
            let store = store.clone();
            async move { store.load(false).await }
        });
        wait_for_calls(&source, 1).await;
        let second = tokio::spawn({
            let store = store.clone();
            async move { store.load(false).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        source.release();
        assert!(first.await.unwrap().is_err());
        assert!(second.await.unwrap().is_err());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_cancel_refresh() {
        let source = Arc::new(CountingSource::gated(sample_records()));
        let store = store_with(&source, Arc::new(MemorySnapshotStorage::new()));

        let abandoned = tokio::spawn({
            let store = store.clone();
            async move { store.load(false).await }
        });
        wait_for_calls(&source, 1).await;
        abandoned.abort();

        source.release();
        while store.is_refreshing() {
            tokio::task::yield_now().await;
        }
        assert!(store.current().is_some());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn records_without_longitude_stay_retrievable() {
        let records: Vec<IncidentRecord> = (0..50_000_u32)
            .map(|i| {
                let mut fields = Map::new();
                fields.insert("incident_id".to_string(), json!(format!("inc-{i}")));
                fields.insert("latitude".to_string(), json!("37.7749"));
                if i % 250 != 0 {
                    fields.insert("longitude".to_string(), json!("-122.4194"));
                }
                IncidentRecord::from_fields(fields, i as usize)
            })
            .collect();
        let source = Arc::new(CountingSource::new(records));
        let store = store_with(&source, Arc::new(MemorySnapshotStorage::new()));

        let snapshot = store.load(false).await.unwrap();
        assert_eq!(snapshot.len(), 50_000);
        assert_eq!(snapshot.indexable().count(), 50_000 - 200);

        let missing = snapshot.get("inc-250").unwrap();
        assert!(missing.coordinate.is_none());
    }
}
