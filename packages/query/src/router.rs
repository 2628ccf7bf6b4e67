//! Chooses a backend for each radius query.
//!
//! The indexed engine is only consulted when its last probe succeeded. Any
//! error from it sends that one query to the fallback engine; the engine's
//! health is left for the next probe to revise.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use crime_radius_incident_models::{Coordinate, QueryBackend, RadiusResult};
use crime_radius_index::IndexedQueryEngine;
use crime_radius_spatial::FallbackQueryEngine;
use crime_radius_store::IncidentStore;

use crate::{CrimeSummary, QueryError, summarize};

/// Dispatches radius queries to the indexed or fallback engine.
#[derive(Clone)]
pub struct QueryRouter {
    store: IncidentStore,
    fallback: FallbackQueryEngine,
    indexed: Option<Arc<IndexedQueryEngine>>,
}

impl QueryRouter {
    /// Creates a router over `store`, with an optional indexed engine.
    #[must_use]
    pub fn new(store: IncidentStore, indexed: Option<Arc<IndexedQueryEngine>>) -> Self {
        Self {
            store,
            fallback: FallbackQueryEngine::new(),
            indexed,
        }
    }

    /// Records within `radius_miles` of (`latitude`, `longitude`).
    ///
    /// # Errors
    ///
    /// * [`QueryError::InvalidInput`] if the center is not a valid
    ///   coordinate or the radius is negative or not finite.
    /// * [`QueryError::NoData`] if no snapshot is resident and the indexed
    ///   engine could not answer.
    pub async fn query_radius(
        &self,
        latitude: f64,
        longitude: f64,
        radius_miles: f64,
    ) -> Result<RadiusResult, QueryError> {
        let center = validate(latitude, longitude, radius_miles)?;

        if let Some(indexed) = self.indexed.as_ref().filter(|e| e.is_available()) {
            match indexed.query_radius(center, radius_miles).await {
                Ok(records) => return Ok(RadiusResult::new(records, QueryBackend::Indexed)),
                Err(e) => log::warn!("Indexed query failed, falling back: {e}"),
            }
        }

        let snapshot = self.store.current().ok_or(QueryError::NoData)?;
        let records = self
            .fallback
            .query_radius(center, radius_miles, snapshot.incidents());
        Ok(RadiusResult::new(records, QueryBackend::Fallback))
    }

    /// Summarizes every resident record within `radius_miles` of
    /// (`latitude`, `longitude`).
    ///
    /// Unlike [`Self::query_radius`] the match set is not capped, so counts
    /// stay exact in dense areas. Always scans the snapshot.
    ///
    /// # Errors
    ///
    /// * [`QueryError::InvalidInput`] for an invalid center or radius.
    /// * [`QueryError::NoData`] if no snapshot is resident.
    pub fn summarize_radius(
        &self,
        latitude: f64,
        longitude: f64,
        radius_miles: f64,
        now: DateTime<Utc>,
    ) -> Result<CrimeSummary, QueryError> {
        let center = validate(latitude, longitude, radius_miles)?;
        let snapshot = self.store.current().ok_or(QueryError::NoData)?;
        let records = FallbackQueryEngine::new().with_limit(usize::MAX).query_radius(
            center,
            radius_miles,
            snapshot.incidents(),
        );
        Ok(summarize(&records, now))
    }
}

fn validate(latitude: f64, longitude: f64, radius_miles: f64) -> Result<Coordinate, QueryError> {
    if !radius_miles.is_finite() || radius_miles < 0.0 {
        return Err(QueryError::InvalidInput {
            message: format!("radius must be a non-negative number of miles, got {radius_miles}"),
        });
    }
    Coordinate::new(latitude, longitude).ok_or_else(|| QueryError::InvalidInput {
        message: format!("({latitude}, {longitude}) is not a valid coordinate"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crime_radius_incident_models::EngineHealth;
    use crime_radius_index::memory::MemoryBackend;

    use crate::testing::{StaticSource, bay_area, indexed, store};

    const SF: (f64, f64) = (37.7749, -122.4194);

    #[tokio::test]
    async fn no_snapshot_and_no_index_is_no_data() {
        let source = Arc::new(StaticSource::new(bay_area()));
        let router = QueryRouter::new(store(&source), None);
        assert_eq!(
            router.query_radius(SF.0, SF.1, 0.5).await.unwrap_err(),
            QueryError::NoData
        );
    }

    #[tokio::test]
    async fn fallback_answers_san_francisco_scenario() {
        let source = Arc::new(StaticSource::new(bay_area()));
        let store = store(&source);
        store.load(false).await.unwrap();
        let router = QueryRouter::new(store, None);

        let result = router.query_radius(SF.0, SF.1, 0.5).await.unwrap();
        assert_eq!(result.backend, QueryBackend::Fallback);
        assert_eq!(result.count, 1);
        assert_eq!(result.records[0].id, "sf");
    }

    #[tokio::test]
    async fn never_connected_index_is_never_called() {
        let source = Arc::new(StaticSource::new(bay_area()));
        let store = store(&source);
        store.load(false).await.unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let engine = indexed(&backend);
        let router = QueryRouter::new(store, Some(Arc::clone(&engine)));

        for _ in 0..5 {
            let result = router.query_radius(SF.0, SF.1, 0.5).await.unwrap();
            assert_eq!(result.backend, QueryBackend::Fallback);
        }
        assert_eq!(engine.health(), EngineHealth::Unknown);
        assert_eq!(backend.query_count(), 0);
        assert_eq!(backend.ping_count(), 0);
    }

    #[tokio::test]
    async fn available_index_answers() {
        let source = Arc::new(StaticSource::new(bay_area()));
        let store = store(&source);
        let snapshot = store.load(false).await.unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let engine = indexed(&backend);
        assert!(engine.connect().await);
        engine.reindex(snapshot.incidents()).await.unwrap();

        let router = QueryRouter::new(store, Some(engine));
        let result = router.query_radius(SF.0, SF.1, 0.5).await.unwrap();
        assert_eq!(result.backend, QueryBackend::Indexed);
        assert_eq!(result.count, 1);
        assert_eq!(backend.query_count(), 1);
    }

    #[tokio::test]
    async fn mid_flight_failure_falls_back_without_changing_health() {
        let source = Arc::new(StaticSource::new(bay_area()));
        let store = store(&source);
        store.load(false).await.unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let engine = indexed(&backend);
        engine.connect().await;
        backend.set_fail_queries(true);

        let router = QueryRouter::new(store, Some(Arc::clone(&engine)));
        let result = router.query_radius(SF.0, SF.1, 0.5).await.unwrap();
        assert_eq!(result.backend, QueryBackend::Fallback);
        assert_eq!(result.count, 1);
        assert_eq!(engine.health(), EngineHealth::Available);

        // The next query tries the index again.
        backend.set_fail_queries(false);
        router.query_radius(SF.0, SF.1, 0.5).await.unwrap();
        assert_eq!(backend.query_count(), 2);
    }

    #[tokio::test]
    async fn failing_index_without_snapshot_is_no_data() {
        let source = Arc::new(StaticSource::new(bay_area()));
        source.fail.store(true, Ordering::SeqCst);
        let backend = Arc::new(MemoryBackend::new());
        let engine = indexed(&backend);
        engine.connect().await;
        backend.set_fail_queries(true);

        let router = QueryRouter::new(store(&source), Some(engine));
        assert_eq!(
            router.query_radius(SF.0, SF.1, 0.5).await.unwrap_err(),
            QueryError::NoData
        );
    }

    #[tokio::test]
    async fn empty_snapshot_gives_empty_result() {
        let source = Arc::new(StaticSource::new(Vec::new()));
        let store = store(&source);
        store.load(false).await.unwrap();
        let router = QueryRouter::new(store, None);

        let result = router.query_radius(SF.0, SF.1, 5.0).await.unwrap();
        assert_eq!(result.count, 0);
        assert!(result.records.is_empty());
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_any_backend() {
        let source = Arc::new(StaticSource::new(bay_area()));
        let router = QueryRouter::new(store(&source), None);

        for (lat, lon, radius) in [
            (f64::NAN, -122.4, 0.5),
            (91.0, -122.4, 0.5),
            (37.7, -181.0, 0.5),
            (37.7, -122.4, -1.0),
            (37.7, -122.4, f64::INFINITY),
        ] {
            assert!(matches!(
                router.query_radius(lat, lon, radius).await,
                Err(QueryError::InvalidInput { .. })
            ));
        }
    }
}
