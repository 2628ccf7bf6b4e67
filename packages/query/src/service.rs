//! The incident service: store, engines and refresh policy wired together.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crime_radius_incident_models::{CacheSnapshot, EngineHealth, RadiusResult};
use crime_radius_index::elasticsearch::ElasticsearchBackend;
use crime_radius_index::{IndexError, IndexedQueryEngine};
use crime_radius_source::feed::sf_feed;
use crime_radius_source::socrata::SocrataSource;
use crime_radius_source::{FetchError, IncidentSource};
use crime_radius_store::{
    FileSnapshotStorage, IncidentStore, MemorySnapshotStorage, SnapshotStorage, StoreError,
    StoreSettings,
};
use tokio::task::JoinHandle;

use crate::{CacheRefreshPolicy, CrimeSummary, QueryError, QueryRouter, ServiceConfig};

/// Errors building an [`IncidentService`] from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The feed client could not be built.
    #[error("Failed to set up incident feed: {0}")]
    Source(#[from] FetchError),

    /// The search client could not be built.
    #[error("Failed to set up search client: {0}")]
    Index(#[from] IndexError),
}

/// Point-in-time view of the service, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Records in the resident snapshot.
    pub incidents: Option<usize>,
    /// Records with a usable coordinate.
    pub indexable: Option<usize>,
    /// When the resident snapshot was fetched.
    pub fetched_at: Option<DateTime<Utc>>,
    /// Age of the resident snapshot.
    pub age: Option<Duration>,
    /// Whether the next load would refresh.
    pub stale: bool,
    /// Indexed engine health, `None` when it is disabled.
    pub index_health: Option<EngineHealth>,
}

/// Answers radius queries over a self-refreshing incident snapshot.
pub struct IncidentService {
    store: IncidentStore,
    router: QueryRouter,
    policy: Arc<CacheRefreshPolicy>,
    indexed: Option<Arc<IndexedQueryEngine>>,
    maintenance_interval: Duration,
}

impl IncidentService {
    /// Wires a service from its parts.
    #[must_use]
    pub fn new(
        source: Arc<dyn IncidentSource>,
        storage: Arc<dyn SnapshotStorage>,
        indexed: Option<Arc<IndexedQueryEngine>>,
        settings: StoreSettings,
    ) -> Self {
        let store = IncidentStore::new(source, storage, settings);
        Self {
            router: QueryRouter::new(store.clone(), indexed.clone()),
            policy: Arc::new(CacheRefreshPolicy::new(store.clone(), indexed.clone())),
            store,
            indexed,
            maintenance_interval: ServiceConfig::default().maintenance_interval,
        }
    }

    /// Builds the production service: the embedded San Francisco feed,
    /// file or memory snapshot storage, and Elasticsearch when configured.
    ///
    /// The fetch window and record cap come from the feed definition; the
    /// TTL comes from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if an HTTP client cannot be built.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let mut feed = sf_feed();
        if let Some(url) = &config.feed_url {
            feed = feed.with_api_url(url.clone());
        }
        let (feed_window_days, feed_max_records) = (feed.window_days, feed.max_records);
        let source = SocrataSource::new(feed)?.with_timeout(config.fetch_timeout);

        let storage: Arc<dyn SnapshotStorage> = match &config.cache_file {
            Some(path) => {
                log::info!("Durable incident cache at {}", path.display());
                Arc::new(FileSnapshotStorage::new(path))
            }
            None => {
                log::info!("Durable incident cache disabled, keeping snapshots in memory");
                Arc::new(MemorySnapshotStorage::new())
            }
        };

        let indexed = match &config.elasticsearch_url {
            Some(url) => {
                let backend = ElasticsearchBackend::new(url)?;
                Some(Arc::new(IndexedQueryEngine::new(
                    Arc::new(backend),
                    config.elasticsearch_index.clone(),
                )))
            }
            None => {
                log::info!("Search service disabled, all queries use fallback filtering");
                None
            }
        };

        let settings = StoreSettings {
            window_days: feed_window_days,
            max_records: feed_max_records,
            ..config.store
        };
        let mut service = Self::new(Arc::new(source), storage, indexed, settings);
        service.maintenance_interval = config.maintenance_interval;
        Ok(service)
    }

    /// Probes the search service, then loads the snapshot. Failures are
    /// logged; queries keep working with whatever becomes available later.
    pub async fn start(&self) {
        self.policy.probe().await;
        match self.policy.ensure_loaded().await {
            Ok(snapshot) => log::info!("Incident service ready with {} incidents", snapshot.len()),
            Err(e) => log::error!("Initial incident load failed: {e}"),
        }
    }

    /// Starts periodic probing and refreshing.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        self.policy.spawn_maintenance(self.maintenance_interval)
    }

    /// Records within `radius_miles` of (`latitude`, `longitude`).
    ///
    /// Loads the snapshot on first use and refreshes a stale one in the
    /// background.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] for invalid input, or when there is neither a
    /// snapshot nor a usable indexed engine.
    pub async fn query_radius(
        &self,
        latitude: f64,
        longitude: f64,
        radius_miles: f64,
    ) -> Result<RadiusResult, QueryError> {
        self.prepare().await;
        self.router
            .query_radius(latitude, longitude, radius_miles)
            .await
    }

    /// Category and recency counts over every resident record within
    /// `radius_miles` of (`latitude`, `longitude`), uncapped.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] for invalid input, or when no snapshot is
    /// resident.
    pub async fn summarize_radius(
        &self,
        latitude: f64,
        longitude: f64,
        radius_miles: f64,
    ) -> Result<CrimeSummary, QueryError> {
        self.prepare().await;
        self.router
            .summarize_radius(latitude, longitude, radius_miles, Utc::now())
    }

    /// Loads the snapshot on first use, or refreshes a stale one in the
    /// background.
    async fn prepare(&self) {
        if self.store.current().is_none() {
            if let Err(e) = self.policy.ensure_loaded().await {
                log::warn!("Incident data unavailable: {e}");
            }
        } else {
            self.policy.refresh_in_background();
        }
    }

    /// The full resident dataset, reloading it first if it is stale.
    ///
    /// A failed reload still returns the previous snapshot if there is one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the reload fails and nothing is resident.
    pub async fn all_incidents(&self) -> Result<Arc<CacheSnapshot>, StoreError> {
        match self.policy.refresh(false).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => self.store.current().ok_or(e),
        }
    }

    /// Current snapshot and engine state.
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        let snapshot = self.store.current();
        ServiceStatus {
            incidents: snapshot.as_ref().map(|s| s.len()),
            indexable: snapshot.as_ref().map(|s| s.indexable().count()),
            fetched_at: snapshot.as_ref().map(|s| s.fetched_at()),
            age: self.store.age(),
            stale: self.store.is_stale(),
            index_health: self.indexed.as_ref().map(|e| e.health()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crime_radius_incident_models::{IncidentRecord, QueryBackend};
    use crime_radius_index::SearchBackend;
    use crime_radius_index::memory::MemoryBackend;

    use crate::testing::{StaticSource, bay_area, record};

    fn service(source: &Arc<StaticSource>, backend: Option<&Arc<MemoryBackend>>) -> IncidentService {
        let source: Arc<dyn IncidentSource> = Arc::<StaticSource>::clone(source);
        let indexed = backend.map(|b| {
            let b: Arc<dyn SearchBackend> = Arc::<MemoryBackend>::clone(b);
            Arc::new(IndexedQueryEngine::new(b, "sf-crimes"))
        });
        IncidentService::new(
            source,
            Arc::new(MemorySnapshotStorage::new()),
            indexed,
            StoreSettings::default(),
        )
    }

    #[tokio::test]
    async fn first_query_loads_lazily() {
        let source = Arc::new(StaticSource::new(bay_area()));
        let service = service(&source, None);

        let result = service.query_radius(37.7749, -122.4194, 0.5).await.unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(result.backend, QueryBackend::Fallback);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn unreachable_feed_without_index_is_no_data() {
        let source = Arc::new(StaticSource::new(bay_area()));
        source.fail.store(true, Ordering::SeqCst);
        let service = service(&source, None);

        assert_eq!(
            service.query_radius(37.7749, -122.4194, 0.5).await.unwrap_err(),
            QueryError::NoData
        );
        assert!(service.all_incidents().await.is_err());
    }

    #[tokio::test]
    async fn start_probes_indexes_and_routes_to_index() {
        let source = Arc::new(StaticSource::new(bay_area()));
        let backend = Arc::new(MemoryBackend::new());
        let service = service(&source, Some(&backend));

        service.start().await;
        let status = service.status();
        assert_eq!(status.incidents, Some(2));
        assert_eq!(status.indexable, Some(2));
        assert!(!status.stale);
        assert_eq!(status.index_health, Some(EngineHealth::Available));
        assert_eq!(backend.document_count("sf-crimes"), 2);

        let result = service.query_radius(37.7749, -122.4194, 0.5).await.unwrap();
        assert_eq!(result.backend, QueryBackend::Indexed);
        assert_eq!(result.records[0].id, "sf");
    }

    #[tokio::test]
    async fn start_with_down_index_still_serves() {
        let source = Arc::new(StaticSource::new(bay_area()));
        let backend = Arc::new(MemoryBackend::new());
        backend.set_reachable(false);
        let service = service(&source, Some(&backend));

        service.start().await;
        assert_eq!(service.status().index_health, Some(EngineHealth::Unavailable));

        let result = service.query_radius(37.7749, -122.4194, 0.5).await.unwrap();
        assert_eq!(result.backend, QueryBackend::Fallback);
        assert_eq!(backend.query_count(), 0);
    }

    #[tokio::test]
    async fn summary_counts_beyond_result_cap() {
        let records: Vec<IncidentRecord> = (0..1500)
            .map(|i| record(&format!("dense-{i}"), "37.7749", "-122.4194"))
            .chain(bay_area())
            .collect();
        let source = Arc::new(StaticSource::new(records));
        let service = service(&source, None);

        let result = service.query_radius(37.7749, -122.4194, 0.5).await.unwrap();
        assert_eq!(result.count, 1000);

        let summary = service.summarize_radius(37.7749, -122.4194, 0.5).await.unwrap();
        assert_eq!(summary.total, 1501);
        assert_eq!(summary.by_category.get("Other"), Some(&1501));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn summary_without_data_is_no_data() {
        let source = Arc::new(StaticSource::new(bay_area()));
        source.fail.store(true, Ordering::SeqCst);
        let service = service(&source, None);

        assert_eq!(
            service
                .summarize_radius(37.7749, -122.4194, 0.5)
                .await
                .unwrap_err(),
            QueryError::NoData
        );
    }

    #[tokio::test]
    async fn all_incidents_returns_every_record() {
        let source = Arc::new(StaticSource::new(bay_area()));
        let service = service(&source, None);

        assert!(service.status().incidents.is_none());
        let snapshot = service.all_incidents().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn from_config_without_backends() {
        let config = ServiceConfig::default()
            .with_cache_file(None)
            .with_elasticsearch_url(None);
        let service = IncidentService::from_config(&config).unwrap();
        assert!(service.status().index_health.is_none());
        assert!(service.status().stale);
    }

    #[test]
    fn from_config_takes_window_from_feed() {
        let config = ServiceConfig {
            store: StoreSettings {
                ttl: Duration::from_secs(3600),
                window_days: 1,
                max_records: 10,
            },
            ..ServiceConfig::default()
        }
        .with_cache_file(None)
        .with_elasticsearch_url(None);
        let service = IncidentService::from_config(&config).unwrap();

        let feed = sf_feed();
        let settings = service.store.settings();
        assert_eq!(settings.window_days, feed.window_days);
        assert_eq!(settings.max_records, feed.max_records);
        assert_eq!(settings.ttl, Duration::from_secs(3600));
    }
}
