//! Parsing helpers for Socrata responses.

use chrono::{DateTime, NaiveDateTime, Utc};
use crime_radius_incident_models::IncidentRecord;
use serde_json::Value;

use crate::FetchError;

/// Parses a Socrata datetime string (ISO 8601 with optional fractional seconds).
#[must_use]
pub fn parse_socrata_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

/// Formats a timestamp the way Socrata `$where` clauses expect.
#[must_use]
pub fn format_socrata_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Converts one page of a bare-array response into records.
///
/// `offset` is the number of records already received, so fallback row
/// identifiers stay unique across pages.
///
/// # Errors
///
/// Returns [`FetchError::Malformed`] if the body is not an array of objects.
pub fn records_from_page(body: Value, offset: usize) -> Result<Vec<IncidentRecord>, FetchError> {
    let Value::Array(items) = body else {
        return Err(FetchError::Malformed {
            message: "expected a JSON array of incidents".to_string(),
        });
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(fields) => Ok(IncidentRecord::from_fields(fields, offset + i)),
            other => Err(FetchError::Malformed {
                message: format!("record {} is not an object: {other}", offset + i),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_socrata_date_with_fractional() {
        let dt = parse_socrata_date("2024-01-15T14:30:00.000").unwrap();
        assert_eq!(dt.to_string(), "2024-01-15 14:30:00 UTC");
    }

    #[test]
    fn parses_socrata_date_without_fractional() {
        let dt = parse_socrata_date("2024-01-15T14:30:00").unwrap();
        assert_eq!(dt.to_string(), "2024-01-15 14:30:00 UTC");
    }

    #[test]
    fn rejects_invalid_date() {
        assert!(parse_socrata_date("not-a-date").is_none());
    }

    #[test]
    fn formats_where_clause_date() {
        let dt = parse_socrata_date("2024-01-15T14:30:00.250").unwrap();
        assert_eq!(format_socrata_date(dt), "2024-01-15T14:30:00");
    }

    #[test]
    fn converts_page_with_offset_row_ids() {
        let body = json!([
            { "incident_id": "1", "latitude": "37.77", "longitude": "-122.41" },
            { "incident_category": "Assault" },
        ]);
        let records = records_from_page(body, 100).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "1");
        assert!(records[0].is_indexable());
        assert_eq!(records[1].id, "row-101");
        assert!(!records[1].is_indexable());
    }

    #[test]
    fn rejects_non_array_body() {
        let err = records_from_page(json!({ "error": "nope" }), 0).unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }));
    }

    #[test]
    fn rejects_non_object_record() {
        let err = records_from_page(json!([1, 2]), 0).unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }));
    }
}
