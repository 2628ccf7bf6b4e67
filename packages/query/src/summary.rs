//! Category and recency breakdown of a radius result.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use crime_radius_incident_models::IncidentRecord;
use crime_radius_source::parsing::parse_socrata_date;

/// Field holding the incident category.
pub const CATEGORY_FIELD: &str = "incident_category";

/// Field holding the incident timestamp.
pub const DATETIME_FIELD: &str = "incident_datetime";

/// Category assigned to records without one.
pub const UNCATEGORIZED: &str = "Other";

/// How many days back an incident still counts as recent.
pub const RECENT_DAYS: i64 = 7;

/// Counts over a set of incidents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrimeSummary {
    /// Number of incidents.
    pub total: usize,
    /// Incidents per category.
    pub by_category: BTreeMap<String, usize>,
    /// Incidents within [`RECENT_DAYS`] of the reference time.
    pub recent: usize,
    /// The most frequent category. Ties go to the alphabetically first.
    pub top_category: Option<String>,
}

/// Summarizes `records` relative to `now`.
#[must_use]
pub fn summarize(records: &[IncidentRecord], now: DateTime<Utc>) -> CrimeSummary {
    let cutoff = now - TimeDelta::days(RECENT_DAYS);
    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
    let mut recent = 0;

    for record in records {
        let category = record
            .field_str(CATEGORY_FIELD)
            .filter(|c| !c.is_empty())
            .unwrap_or(UNCATEGORIZED);
        *by_category.entry(category.to_string()).or_default() += 1;

        if record
            .field_str(DATETIME_FIELD)
            .and_then(parse_socrata_date)
            .is_some_and(|at| at > cutoff)
        {
            recent += 1;
        }
    }

    let top_category = by_category
        .iter()
        .fold(None::<(&String, usize)>, |best, (category, &count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((category, count)),
        })
        .map(|(category, _)| category.clone());

    CrimeSummary {
        total: records.len(),
        by_category,
        recent,
        top_category,
    }
}
