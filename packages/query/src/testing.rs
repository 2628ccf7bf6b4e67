//! Shared test doubles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use crime_radius_incident_models::IncidentRecord;
use crime_radius_index::memory::MemoryBackend;
use crime_radius_index::{IndexedQueryEngine, SearchBackend};
use crime_radius_source::{FetchError, FetchOptions, IncidentSource};
use crime_radius_store::{IncidentStore, MemorySnapshotStorage, StoreSettings};
use serde_json::{Map, json};

/// Feed returning a fixed record set, counting calls.
pub struct StaticSource {
    pub records: Vec<IncidentRecord>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl StaticSource {
    pub fn new(records: Vec<IncidentRecord>) -> Self {
        Self {
            records,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IncidentSource for StaticSource {
    fn id(&self) -> &str {
        "static"
    }

    async fn fetch(&self, _options: &FetchOptions) -> Result<Vec<IncidentRecord>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(FetchError::Malformed {
                message: "feed down".to_string(),
            });
        }
        Ok(self.records.clone())
    }
}

pub fn record(id: &str, lat: &str, lon: &str) -> IncidentRecord {
    let mut fields = Map::new();
    fields.insert("incident_id".to_string(), json!(id));
    fields.insert("latitude".to_string(), json!(lat));
    fields.insert("longitude".to_string(), json!(lon));
    IncidentRecord::from_fields(fields, 0)
}

/// One record in downtown San Francisco, one in Oakland.
pub fn bay_area() -> Vec<IncidentRecord> {
    vec![
        record("sf", "37.7750", "-122.4195"),
        record("oakland", "37.8044", "-122.2712"),
    ]
}

pub fn store(source: &Arc<StaticSource>) -> IncidentStore {
    let source: Arc<dyn IncidentSource> = Arc::<StaticSource>::clone(source);
    IncidentStore::new(
        source,
        Arc::new(MemorySnapshotStorage::new()),
        StoreSettings::default(),
    )
}

pub fn indexed(backend: &Arc<MemoryBackend>) -> Arc<IndexedQueryEngine> {
    let backend: Arc<dyn SearchBackend> = Arc::<MemoryBackend>::clone(backend);
    Arc::new(IndexedQueryEngine::new(backend, "sf-crimes"))
}
