#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Incident record, coordinate, and cache snapshot types.
//!
//! Every component of the proximity cache speaks in terms of these types:
//! the remote feed produces [`IncidentRecord`]s, the store owns them inside
//! a [`CacheSnapshot`], and both query engines hand back clones of them.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{AsRefStr, Display, EnumString};

/// Upper bound on the number of records returned by a single radius query.
///
/// Shared by both query backends so their truncation behavior stays
/// comparable.
pub const MAX_RADIUS_RESULTS: usize = 1000;

/// Radius used when a caller does not specify one.
pub const DEFAULT_RADIUS_MILES: f64 = 0.5;

/// Field holding the feed's incident identifier.
pub const INCIDENT_ID_FIELD: &str = "incident_id";

/// Field holding the feed's per-row identifier, used when `incident_id` is
/// absent.
pub const ROW_ID_FIELD: &str = "row_id";

/// Field holding the latitude (free-form text or number).
pub const LATITUDE_FIELD: &str = "latitude";

/// Field holding the longitude (free-form text or number).
pub const LONGITUDE_FIELD: &str = "longitude";

/// A validated WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    /// Latitude in degrees, within `[-90, 90]`.
    pub latitude: f64,
    /// Longitude in degrees, within `[-180, 180]`.
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a coordinate, returning `None` unless both values are finite
    /// and in range.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        Some(Self {
            latitude,
            longitude,
        })
    }

    /// Parses a coordinate from raw feed values.
    ///
    /// Values may be JSON numbers or numeric strings. Returns `None` if
    /// either value is missing, unparseable or out of range.
    #[must_use]
    pub fn from_values(latitude: Option<&Value>, longitude: Option<&Value>) -> Option<Self> {
        let latitude = parse_degrees(latitude?)?;
        let longitude = parse_degrees(longitude?)?;
        Self::new(latitude, longitude)
    }
}

fn parse_degrees(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// A single incident as delivered by the remote feed.
///
/// The raw field map is kept intact; the identifier and coordinate are
/// derived once at ingest and never recomputed.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentRecord {
    /// Stable identifier: `incident_id`, else `row_id`, else `row-<position>`.
    pub id: String,
    /// Parsed location. `None` makes the record unindexable.
    pub coordinate: Option<Coordinate>,
    /// Raw fields exactly as fetched.
    pub fields: Map<String, Value>,
}

impl IncidentRecord {
    /// Builds a record from raw feed fields.
    ///
    /// `position` is the record's index within its fetch and is only used
    /// when the feed supplies no identifier.
    #[must_use]
    pub fn from_fields(fields: Map<String, Value>, position: usize) -> Self {
        let id = identifier(&fields, INCIDENT_ID_FIELD)
            .or_else(|| identifier(&fields, ROW_ID_FIELD))
            .unwrap_or_else(|| format!("row-{position}"));
        let coordinate =
            Coordinate::from_values(fields.get(LATITUDE_FIELD), fields.get(LONGITUDE_FIELD));

        Self {
            id,
            coordinate,
            fields,
        }
    }

    /// Returns a string field, if present and a string.
    #[must_use]
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Whether this record can take part in spatial queries.
    #[must_use]
    pub const fn is_indexable(&self) -> bool {
        self.coordinate.is_some()
    }
}

fn identifier(fields: &Map<String, Value>, name: &str) -> Option<String> {
    match fields.get(name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The full resident dataset plus the time its fetch completed.
///
/// Immutable once built; a refresh replaces the whole snapshot.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    incidents: Vec<IncidentRecord>,
    fetched_at: DateTime<Utc>,
    by_id: BTreeMap<String, usize>,
}

impl CacheSnapshot {
    /// Builds a snapshot from already-parsed records.
    #[must_use]
    pub fn new(incidents: Vec<IncidentRecord>, fetched_at: DateTime<Utc>) -> Self {
        let mut by_id = BTreeMap::new();
        for (position, record) in incidents.iter().enumerate() {
            by_id.entry(record.id.clone()).or_insert(position);
        }
        Self {
            incidents,
            fetched_at,
            by_id,
        }
    }

    /// Builds a snapshot from raw field maps in feed order.
    #[must_use]
    pub fn from_raw(raw: Vec<Map<String, Value>>, fetched_at: DateTime<Utc>) -> Self {
        let incidents = raw
            .into_iter()
            .enumerate()
            .map(|(position, fields)| IncidentRecord::from_fields(fields, position))
            .collect();
        Self::new(incidents, fetched_at)
    }

    /// All records in feed order, including unindexable ones.
    #[must_use]
    pub fn incidents(&self) -> &[IncidentRecord] {
        &self.incidents
    }

    /// When the remote fetch that produced this snapshot completed.
    #[must_use]
    pub const fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Number of records, including unindexable ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    /// Whether the snapshot holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }

    /// Looks up a record by identifier. When identifiers repeat, the first
    /// record in feed order wins.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&IncidentRecord> {
        self.by_id.get(id).map(|&position| &self.incidents[position])
    }

    /// Records with a valid coordinate, in feed order.
    pub fn indexable(&self) -> impl Iterator<Item = &IncidentRecord> {
        self.incidents.iter().filter(|r| r.is_indexable())
    }

    /// Time elapsed since `fetched_at`. A timestamp in the future counts as
    /// zero age.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or_default()
    }

    /// Whether the snapshot is younger than `ttl`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) < ttl
    }
}

/// Connectivity state of a query backend.
///
/// Only connectivity probes change it; query failures never do.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineHealth {
    /// Never probed.
    #[default]
    Unknown,
    /// Last probe succeeded.
    Available,
    /// Last probe failed.
    Unavailable,
}

/// Which backend answered a radius query.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueryBackend {
    /// The geo-indexed search service.
    Indexed,
    /// Brute-force filtering over the resident snapshot.
    Fallback,
}

/// Records matching a radius query.
#[derive(Debug, Clone)]
pub struct RadiusResult {
    /// Matching records (at most [`MAX_RADIUS_RESULTS`]).
    pub records: Vec<IncidentRecord>,
    /// Number of records returned.
    pub count: usize,
    /// Backend that produced the records.
    pub backend: QueryBackend,
}

impl RadiusResult {
    /// Wraps query output, deriving `count`.
    #[must_use]
    pub fn new(records: Vec<IncidentRecord>, backend: QueryBackend) -> Self {
        Self {
            count: records.len(),
            records,
            backend,
        }
    }
}
