//! The indexed radius-query engine.
//!
//! The engine reads through an alias. A reindex builds a fresh physical
//! index named `<alias>-<timestamp>-<generation>`, fills it, then swaps the
//! alias onto it in one request, so queries only ever see a complete index.
//! Old physical indices are deleted after the swap.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use crime_radius_incident_models::{
    Coordinate, EngineHealth, IncidentRecord, LATITUDE_FIELD, LONGITUDE_FIELD, MAX_RADIUS_RESULTS,
};
use serde_json::{Value, json};

use crate::{HealthCell, IndexDocument, IndexError, ReindexError, SearchBackend};

/// Documents per `_bulk` request.
const BULK_CHUNK_SIZE: usize = 5_000;

/// Field holding the `geo_point` in indexed documents.
const LOCATION_FIELD: &str = "location";

/// Deadlines for calls to the search service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexTimeouts {
    /// Connectivity probe.
    pub probe: Duration,
    /// Radius query.
    pub query: Duration,
    /// One `_bulk` request.
    pub bulk: Duration,
    /// Index and alias management.
    pub admin: Duration,
}

impl Default for IndexTimeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(3),
            query: Duration::from_secs(5),
            bulk: Duration::from_secs(120),
            admin: Duration::from_secs(10),
        }
    }
}

/// Radius queries served by a geo-indexed search service.
pub struct IndexedQueryEngine {
    backend: Arc<dyn SearchBackend>,
    alias: String,
    health: HealthCell,
    timeouts: IndexTimeouts,
    generation: AtomicU64,
}

impl IndexedQueryEngine {
    /// Creates an engine reading from `alias`. Health starts
    /// [`EngineHealth::Unknown`] until [`Self::connect`] runs.
    #[must_use]
    pub fn new(backend: Arc<dyn SearchBackend>, alias: impl Into<String>) -> Self {
        Self {
            backend,
            alias: alias.into(),
            health: HealthCell::default(),
            timeouts: IndexTimeouts::default(),
            generation: AtomicU64::new(0),
        }
    }

    /// Overrides the call deadlines.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: IndexTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// The alias queries read from.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Result of the last probe.
    #[must_use]
    pub fn health(&self) -> EngineHealth {
        self.health.get()
    }

    /// Whether the last probe succeeded.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.health() == EngineHealth::Available
    }

    /// Probes the search service and records the outcome. Never fails.
    pub async fn connect(&self) -> bool {
        let result = timed("ping", self.timeouts.probe, self.backend.ping()).await;
        let health = if result.is_ok() {
            EngineHealth::Available
        } else {
            EngineHealth::Unavailable
        };

        let previous = self.health.set(health);
        match (&result, previous == health) {
            (Ok(()), false) => log::info!("Connected to search service ({})", self.alias),
            (Err(e), false) => {
                log::warn!("Search service not available, using fallback: {e}");
            }
            (Ok(()), true) => log::debug!("Search service still available"),
            (Err(e), true) => log::debug!("Search service still unavailable: {e}"),
        }

        result.is_ok()
    }

    /// Makes sure the alias resolves to an index with the incident mapping.
    /// Does nothing when it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Unavailable`] unless the last probe succeeded,
    /// or the underlying error if a call fails.
    pub async fn ensure_schema(&self) -> Result<(), IndexError> {
        self.require_available()?;
        let exists = timed(
            "index exists",
            self.timeouts.admin,
            self.backend.index_exists(&self.alias),
        )
        .await?;
        if exists {
            log::debug!("Search index {} already exists", self.alias);
            return Ok(());
        }

        let physical = self.physical_name();
        timed(
            "create index",
            self.timeouts.admin,
            self.backend.create_index(&physical),
        )
        .await?;
        if let Err(e) = timed(
            "update aliases",
            self.timeouts.admin,
            self.backend.point_alias(&self.alias, &physical),
        )
        .await
        {
            self.discard(&physical).await;
            return Err(e);
        }
        log::info!("Created search index {physical} behind alias {}", self.alias);
        Ok(())
    }

    /// Replaces the mirrored contents with the indexable subset of
    /// `records`, returning how many documents were accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ReindexError`] if the service is unavailable, a call fails,
    /// or every document is rejected. The alias then still points at the
    /// previous index.
    pub async fn reindex(&self, records: &[IncidentRecord]) -> Result<usize, ReindexError> {
        self.require_available()?;

        let documents: Vec<IndexDocument> = records.iter().filter_map(to_document).collect();
        let physical = self.physical_name();
        log::info!(
            "Indexing {} incidents into {physical} ({} skipped without coordinates)...",
            documents.len(),
            records.len() - documents.len()
        );

        let filled = match self.fill(&physical, &documents).await {
            Ok(indexed) => self
                .swap_alias(&physical)
                .await
                .map(|()| indexed)
                .map_err(ReindexError::from),
            Err(e) => Err(e),
        };
        match filled {
            Ok(indexed) => {
                log::info!("Indexed {indexed} incidents behind alias {}", self.alias);
                Ok(indexed)
            }
            Err(e) => {
                self.discard(&physical).await;
                Err(e)
            }
        }
    }

    async fn discard(&self, physical: &str) {
        if let Err(e) = timed(
            "delete index",
            self.timeouts.admin,
            self.backend.delete_index(physical),
        )
        .await
        {
            log::warn!("Could not remove unused index {physical}: {e}");
        }
    }

    /// Records within `radius_miles` of `center`, at most
    /// [`MAX_RADIUS_RESULTS`] of them.
    ///
    /// A failure here does not change [`Self::health`]; only probes do.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Unavailable`] unless the last probe succeeded,
    /// or the underlying error if the search fails or times out.
    pub async fn query_radius(
        &self,
        center: Coordinate,
        radius_miles: f64,
    ) -> Result<Vec<IncidentRecord>, IndexError> {
        self.require_available()?;
        let hits = timed(
            "search",
            self.timeouts.query,
            self.backend
                .geo_distance(&self.alias, center, radius_miles, MAX_RADIUS_RESULTS),
        )
        .await?;
        log::debug!(
            "Indexed query ({}, {}) r={radius_miles}mi: {} hits",
            center.latitude,
            center.longitude,
            hits.len()
        );
        Ok(hits.into_iter().map(from_document).collect())
    }

    fn require_available(&self) -> Result<(), IndexError> {
        match self.health() {
            EngineHealth::Available => Ok(()),
            health => Err(IndexError::Unavailable { health }),
        }
    }

    fn physical_name(&self) -> String {
        format!(
            "{}-{}-{}",
            self.alias,
            Utc::now().format("%Y%m%d%H%M%S"),
            self.generation.fetch_add(1, Ordering::Relaxed)
        )
    }

    async fn fill(&self, physical: &str, documents: &[IndexDocument]) -> Result<usize, ReindexError> {
        timed(
            "create index",
            self.timeouts.admin,
            self.backend.create_index(physical),
        )
        .await?;

        let mut indexed = 0;
        let mut failed = 0;
        for chunk in documents.chunks(BULK_CHUNK_SIZE) {
            let outcome = timed(
                "bulk",
                self.timeouts.bulk,
                self.backend.bulk_index(physical, chunk),
            )
            .await?;
            indexed += outcome.indexed;
            failed += outcome.failed;
        }

        if failed > 0 {
            if indexed == 0 {
                return Err(ReindexError::Rejected { total: failed });
            }
            log::warn!("{failed} incidents were rejected by the search service");
        }
        Ok(indexed)
    }

    async fn swap_alias(&self, physical: &str) -> Result<(), IndexError> {
        let previous = timed(
            "update aliases",
            self.timeouts.admin,
            self.backend.point_alias(&self.alias, physical),
        )
        .await?;

        for old in previous {
            match timed(
                "delete index",
                self.timeouts.admin,
                self.backend.delete_index(&old),
            )
            .await
            {
                Ok(()) => log::debug!("Deleted superseded index {old}"),
                Err(e) => log::warn!("Could not delete superseded index {old}: {e}"),
            }
        }
        Ok(())
    }
}

/// Bounds a backend call by `timeout`.
async fn timed<T>(
    operation: &'static str,
    timeout: Duration,
    call: impl Future<Output = Result<T, IndexError>>,
) -> Result<T, IndexError> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| IndexError::Timeout { operation, timeout })?
}

/// The indexed form of a record: its raw fields plus a `location`
/// `geo_point`. `None` for records without a coordinate.
fn to_document(record: &IncidentRecord) -> Option<IndexDocument> {
    let coordinate = record.coordinate?;
    let mut source = record.fields.clone();
    source.insert(
        LOCATION_FIELD.to_string(),
        json!({ "lat": coordinate.latitude, "lon": coordinate.longitude }),
    );
    Some(IndexDocument {
        id: record.id.clone(),
        source,
    })
}

fn from_document(doc: IndexDocument) -> IncidentRecord {
    let IndexDocument { id, mut source } = doc;
    let location = source.remove(LOCATION_FIELD);
    let coordinate =
        Coordinate::from_values(source.get(LATITUDE_FIELD), source.get(LONGITUDE_FIELD)).or_else(
            || {
                let location = location.as_ref()?;
                Coordinate::new(
                    location.get("lat").and_then(Value::as_f64)?,
                    location.get("lon").and_then(Value::as_f64)?,
                )
            },
        );
    IncidentRecord {
        id,
        coordinate,
        fields: source,
    }
}
