#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Geo-indexed mirror of the incident snapshot.
//!
//! [`IndexedQueryEngine`] keeps a copy of the indexable incidents in a
//! search service and answers radius queries with the service's native
//! `geo_distance` filter. The service is an optional capability: its
//! [`EngineHealth`] only changes when [`IndexedQueryEngine::connect`] probes
//! it, and every other operation refuses to run unless the last probe
//! succeeded.
//!
//! The service itself is reached through the [`SearchBackend`] trait.
//! [`elasticsearch::ElasticsearchBackend`] talks to a real cluster; with the
//! `test-support` feature, [`memory::MemoryBackend`] provides an in-process
//! stand-in.

pub mod elasticsearch;
pub mod engine;
pub mod health;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use crime_radius_incident_models::{Coordinate, EngineHealth};
use serde_json::{Map, Value};

pub use engine::{IndexTimeouts, IndexedQueryEngine};
pub use health::HealthCell;

/// Errors talking to the search service.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The last probe did not find the service healthy.
    #[error("Search service unavailable (health: {health})")]
    Unavailable {
        /// Health at the time of the call.
        health: EngineHealth,
    },

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with an error status.
    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        /// Operation that failed.
        operation: &'static str,
        /// Response status.
        status: reqwest::StatusCode,
        /// Response body (truncated).
        body: String,
    },

    /// The operation did not finish in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// The response did not have the expected shape.
    #[error("Malformed search response: {message}")]
    Malformed {
        /// Description of what went wrong.
        message: String,
    },
}

/// Errors from [`IndexedQueryEngine::reindex`].
///
/// Whatever the cause, the alias keeps pointing at the previous index.
#[derive(Debug, thiserror::Error)]
pub enum ReindexError {
    /// A search service call failed.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// The service rejected every document in the batch.
    #[error("All {total} documents were rejected by the search service")]
    Rejected {
        /// Documents submitted.
        total: usize,
    },
}

/// A document as stored in the search service.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    /// Document `_id`; the incident identifier.
    pub id: String,
    /// Document `_source`.
    pub source: Map<String, Value>,
}

/// Per-batch result of a bulk request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Documents accepted.
    pub indexed: usize,
    /// Documents the service rejected individually.
    pub failed: usize,
}

/// Operations the engine needs from a geo-capable search service.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Checks that the service answers at all.
    async fn ping(&self) -> Result<(), IndexError>;

    /// Whether an index or alias called `name` exists.
    async fn index_exists(&self, name: &str) -> Result<bool, IndexError>;

    /// Creates `index` with the incident mapping (`location` as a
    /// `geo_point`).
    async fn create_index(&self, index: &str) -> Result<(), IndexError>;

    /// Indexes `documents` into `index`, overwriting by `_id`. Documents
    /// are searchable once this returns.
    async fn bulk_index(
        &self,
        index: &str,
        documents: &[IndexDocument],
    ) -> Result<BulkOutcome, IndexError>;

    /// Atomically points `alias` at `index` alone, returning the indices it
    /// pointed at before.
    async fn point_alias(&self, alias: &str, index: &str) -> Result<Vec<String>, IndexError>;

    /// Deletes `index`. Deleting a missing index is not an error.
    async fn delete_index(&self, index: &str) -> Result<(), IndexError>;

    /// Documents in `index` whose `location` lies within `radius_miles` of
    /// `center`, at most `size` of them.
    async fn geo_distance(
        &self,
        index: &str,
        center: Coordinate,
        radius_miles: f64,
        size: usize,
    ) -> Result<Vec<IndexDocument>, IndexError>;
}
