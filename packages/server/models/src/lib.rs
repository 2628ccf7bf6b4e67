#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the crime radius server.
//!
//! Incidents go out exactly as the feed delivered them, so clients see the
//! same field names as the upstream dataset.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use crime_radius_incident_models::{EngineHealth, IncidentRecord, QueryBackend};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the server is healthy.
    pub healthy: bool,
    /// Server version.
    pub version: String,
    /// Records in the resident snapshot, if loaded.
    pub incidents: Option<usize>,
    /// Records with usable coordinates, if loaded.
    pub indexable_incidents: Option<usize>,
    /// When the resident snapshot was fetched.
    pub fetched_at: Option<DateTime<Utc>>,
    /// Snapshot age in seconds.
    pub age_seconds: Option<u64>,
    /// Whether the snapshot is due for a refresh.
    pub stale: bool,
    /// Search service health; absent when it is disabled.
    pub search_health: Option<EngineHealth>,
}

/// A crime incident as returned by the API: the raw feed object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiIncident(pub Map<String, Value>);

impl From<&IncidentRecord> for ApiIncident {
    fn from(record: &IncidentRecord) -> Self {
        Self(record.fields.clone())
    }
}

impl From<IncidentRecord> for ApiIncident {
    fn from(record: IncidentRecord) -> Self {
        Self(record.fields)
    }
}

/// Query parameters for the nearby endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct NearbyQueryParams {
    /// Center latitude.
    pub lat: Option<f64>,
    /// Center longitude.
    pub lon: Option<f64>,
    /// Radius in miles.
    pub radius: Option<f64>,
}

/// Center of a nearby query, echoed back to the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ApiLocation {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
}

/// Response of `GET /api/crimes-nearby`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiNearbyResponse {
    /// Matching incidents.
    pub crimes: Vec<ApiIncident>,
    /// Number of matching incidents.
    pub count: usize,
    /// Query center.
    pub location: ApiLocation,
    /// Query radius in miles.
    pub radius: f64,
    /// Backend that answered.
    pub source: QueryBackend,
}

/// Response of `GET /api/crimes-nearby/summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSummaryResponse {
    /// Query center.
    pub location: ApiLocation,
    /// Query radius in miles.
    pub radius: f64,
    /// Number of matching incidents.
    pub total_crimes: usize,
    /// Incidents per category.
    pub crime_types: BTreeMap<String, usize>,
    /// Incidents in the last seven days.
    pub recent_crimes: usize,
    /// The most frequent category.
    pub top_crime_type: Option<String>,
    /// Backend that answered.
    pub source: QueryBackend,
}

/// Error body for non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Human-readable message.
    pub error: String,
}

impl ApiError {
    /// Wraps `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
