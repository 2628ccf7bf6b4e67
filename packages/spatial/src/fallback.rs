//! Brute-force radius filtering over resident incident records.
//!
//! A single pass over the records in their given order. Records without a
//! coordinate never match. Output is truncated by input order, not by
//! distance, so the result is deterministic for a given snapshot.

use crime_radius_incident_models::{Coordinate, IncidentRecord, MAX_RADIUS_RESULTS};

use crate::distance::distance;

/// Radius query engine that scans every record.
#[derive(Debug, Clone, Copy)]
pub struct FallbackQueryEngine {
    limit: usize,
}

impl FallbackQueryEngine {
    /// Creates an engine capped at [`MAX_RADIUS_RESULTS`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            limit: MAX_RADIUS_RESULTS,
        }
    }

    /// Overrides the result cap.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// The maximum number of records a query returns.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Returns clones of every record within `radius_miles` of `center`
    /// (inclusive), preserving input order.
    #[must_use]
    pub fn query_radius(
        &self,
        center: Coordinate,
        radius_miles: f64,
        records: &[IncidentRecord],
    ) -> Vec<IncidentRecord> {
        let matches: Vec<IncidentRecord> = records
            .iter()
            .filter(|record| {
                record
                    .coordinate
                    .is_some_and(|c| distance(center, c) <= radius_miles)
            })
            .take(self.limit)
            .cloned()
            .collect();

        log::debug!(
            "Fallback scan of {} records matched {} within {radius_miles} mi",
            records.len(),
            matches.len()
        );

        matches
    }
}

impl Default for FallbackQueryEngine {
    fn default() -> Self {
        Self::new()
    }
}
