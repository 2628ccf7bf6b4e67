//! In-process [`SearchBackend`] for tests.
//!
//! Stores documents in maps and answers `geo_distance` with the same
//! haversine metric the fallback engine uses. Reachability and query
//! failures can be toggled at runtime, and every call is counted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use crime_radius_incident_models::{Coordinate, LATITUDE_FIELD, LONGITUDE_FIELD};
use serde_json::Value;

use crate::{BulkOutcome, IndexDocument, IndexError, SearchBackend};

#[derive(Debug, Default)]
struct State {
    indices: BTreeMap<String, BTreeMap<String, IndexDocument>>,
    aliases: BTreeMap<String, BTreeSet<String>>,
}

/// In-memory search service.
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<State>,
    reachable: AtomicBool,
    fail_queries: AtomicBool,
    pings: AtomicUsize,
    bulk_calls: AtomicUsize,
    queries: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// A reachable, empty service.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            reachable: AtomicBool::new(true),
            fail_queries: AtomicBool::new(false),
            pings: AtomicUsize::new(0),
            bulk_calls: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        }
    }

    /// Makes every call fail as if the service were down.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Makes only `geo_distance` fail, leaving pings healthy.
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Number of `ping` calls.
    #[must_use]
    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Number of `bulk_index` calls.
    #[must_use]
    pub fn bulk_count(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    /// Number of `geo_distance` calls.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Names of the physical indices that exist.
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        self.lock().indices.keys().cloned().collect()
    }

    /// Number of documents reachable through `name` (index or alias).
    #[must_use]
    pub fn document_count(&self, name: &str) -> usize {
        let state = self.lock();
        resolve(&state, name)
            .iter()
            .filter_map(|index| state.indices.get(index))
            .map(BTreeMap::len)
            .sum()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_reachable(&self, operation: &'static str) -> Result<(), IndexError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IndexError::Status {
                operation,
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "memory backend unreachable".to_string(),
            })
        }
    }
}

fn resolve(state: &State, name: &str) -> Vec<String> {
    state.aliases.get(name).map_or_else(
        || vec![name.to_string()],
        |targets| targets.iter().cloned().collect(),
    )
}

fn document_location(doc: &IndexDocument) -> Option<Coordinate> {
    doc.source
        .get("location")
        .and_then(|location| {
            Coordinate::new(
                location.get("lat")?.as_f64()?,
                location.get("lon")?.as_f64()?,
            )
        })
        .or_else(|| {
            Coordinate::from_values(doc.source.get(LATITUDE_FIELD), doc.source.get(LONGITUDE_FIELD))
        })
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    async fn ping(&self) -> Result<(), IndexError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.check_reachable("ping")
    }

    async fn index_exists(&self, name: &str) -> Result<bool, IndexError> {
        self.check_reachable("index exists")?;
        let state = self.lock();
        Ok(state.indices.contains_key(name) || state.aliases.contains_key(name))
    }

    async fn create_index(&self, index: &str) -> Result<(), IndexError> {
        self.check_reachable("create index")?;
        let mut state = self.lock();
        if state.indices.contains_key(index) {
            return Err(IndexError::Status {
                operation: "create index",
                status: reqwest::StatusCode::BAD_REQUEST,
                body: format!("index {index} already exists"),
            });
        }
        state.indices.insert(index.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn bulk_index(
        &self,
        index: &str,
        documents: &[IndexDocument],
    ) -> Result<BulkOutcome, IndexError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable("bulk")?;
        let mut state = self.lock();
        let docs = state.indices.entry(index.to_string()).or_default();
        for doc in documents {
            docs.insert(doc.id.clone(), doc.clone());
        }
        Ok(BulkOutcome {
            indexed: documents.len(),
            failed: 0,
        })
    }

    async fn point_alias(&self, alias: &str, index: &str) -> Result<Vec<String>, IndexError> {
        self.check_reachable("update aliases")?;
        let mut state = self.lock();
        if state.indices.contains_key(alias) {
            return Err(IndexError::Status {
                operation: "update aliases",
                status: reqwest::StatusCode::BAD_REQUEST,
                body: format!("an index exists with the same name as the alias [{alias}]"),
            });
        }
        let previous = state
            .aliases
            .insert(alias.to_string(), BTreeSet::from([index.to_string()]))
            .unwrap_or_default();
        Ok(previous.into_iter().filter(|old| old != index).collect())
    }

    async fn delete_index(&self, index: &str) -> Result<(), IndexError> {
        self.check_reachable("delete index")?;
        let mut state = self.lock();
        state.indices.remove(index);
        for targets in state.aliases.values_mut() {
            targets.remove(index);
        }
        Ok(())
    }

    async fn geo_distance(
        &self,
        index: &str,
        center: Coordinate,
        radius_miles: f64,
        size: usize,
    ) -> Result<Vec<IndexDocument>, IndexError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.check_reachable("search")?;
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(IndexError::Timeout {
                operation: "search",
                timeout: std::time::Duration::ZERO,
            });
        }

        let state = self.lock();
        let hits: Vec<IndexDocument> = resolve(&state, index)
            .iter()
            .filter_map(|name| state.indices.get(name))
            .flat_map(BTreeMap::values)
            .filter(|doc| {
                document_location(doc).is_some_and(|location| {
                    crime_radius_spatial::distance(center, location) <= radius_miles
                })
            })
            .take(size)
            .cloned()
            .collect();
        Ok(hits)
    }
}
