//! When to reload the snapshot and how the index follows it.
//!
//! Queries never wait on a refresh of a snapshot they can already serve:
//! a stale snapshot keeps answering while a background task reloads it.
//! Only the very first load, with nothing resident, is awaited.
//!
//! The index is rebuilt whenever the store produces a snapshot with a new
//! `fetched_at`, and again whenever a probe finds the search service back
//! after an outage. Reindexing runs under its own lock, one at a time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crime_radius_incident_models::{CacheSnapshot, EngineHealth};
use crime_radius_index::IndexedQueryEngine;
use crime_radius_store::{IncidentStore, StoreError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Drives store reloads and keeps the index in step.
pub struct CacheRefreshPolicy {
    store: IncidentStore,
    indexed: Option<Arc<IndexedQueryEngine>>,
    /// `fetched_at` of the snapshot last mirrored into the index.
    indexed_at: tokio::sync::Mutex<Option<DateTime<Utc>>>,
}

impl CacheRefreshPolicy {
    /// Creates a policy for `store`, mirroring into `indexed` if given.
    #[must_use]
    pub fn new(store: IncidentStore, indexed: Option<Arc<IndexedQueryEngine>>) -> Self {
        Self {
            store,
            indexed,
            indexed_at: tokio::sync::Mutex::new(None),
        }
    }

    /// Returns the resident snapshot, loading one first if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if nothing is resident and the load fails.
    pub async fn ensure_loaded(&self) -> Result<Arc<CacheSnapshot>, StoreError> {
        if let Some(snapshot) = self.store.current() {
            return Ok(snapshot);
        }
        self.refresh(false).await
    }

    /// Loads the store and mirrors a new snapshot into the index.
    ///
    /// Index failures are logged; the store result is returned regardless.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store load fails.
    pub async fn refresh(&self, force: bool) -> Result<Arc<CacheSnapshot>, StoreError> {
        let snapshot = self.store.load(force).await?;
        self.sync_index(&snapshot).await;
        Ok(snapshot)
    }

    /// Starts a refresh in the background if the snapshot is stale and no
    /// refresh is already running. Returns whether one was started.
    pub fn refresh_in_background(self: &Arc<Self>) -> bool {
        if !self.store.is_stale() || self.store.is_refreshing() {
            return false;
        }

        log::info!("Incident snapshot is stale, refreshing in the background");
        let policy = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = policy.refresh(false).await {
                log::error!("Background refresh failed, keeping previous snapshot: {e}");
            }
        });
        true
    }

    /// Re-probes the search service and makes sure its schema exists.
    ///
    /// When the service comes back after being down (or on the first
    /// successful probe), the resident snapshot is mirrored into it again.
    /// Returns the resulting health, or `None` without an indexed engine.
    pub async fn probe(&self) -> Option<EngineHealth> {
        let indexed = self.indexed.as_ref()?;
        let was_available = indexed.is_available();

        if !indexed.connect().await {
            return Some(indexed.health());
        }

        if let Err(e) = indexed.ensure_schema().await {
            log::warn!("Could not ensure search index schema: {e}");
        }

        if !was_available {
            *self.indexed_at.lock().await = None;
        }
        if let Some(snapshot) = self.store.current() {
            self.sync_index(&snapshot).await;
        }

        Some(indexed.health())
    }

    /// Spawns a task that, every `interval`, probes the search service and
    /// refreshes a stale snapshot.
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let policy = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                log::debug!("Running incident cache maintenance");

                policy.probe().await;
                if policy.store.is_stale()
                    && let Err(e) = policy.refresh(false).await
                {
                    log::error!("Scheduled refresh failed, keeping previous snapshot: {e}");
                }
            }
        })
    }

    /// `fetched_at` of the snapshot last mirrored into the index.
    pub async fn indexed_at(&self) -> Option<DateTime<Utc>> {
        *self.indexed_at.lock().await
    }

    async fn sync_index(&self, snapshot: &CacheSnapshot) {
        let Some(indexed) = self.indexed.as_ref().filter(|e| e.is_available()) else {
            return;
        };

        let mut indexed_at = self.indexed_at.lock().await;
        if *indexed_at == Some(snapshot.fetched_at()) {
            return;
        }

        match indexed.reindex(snapshot.incidents()).await {
            Ok(_) => *indexed_at = Some(snapshot.fetched_at()),
            Err(e) => log::error!("Reindex failed, search index keeps previous contents: {e}"),
        }
    }
}
