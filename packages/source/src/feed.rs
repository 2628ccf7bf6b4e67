//! Feed definitions embedded at compile time.
//!
//! Each `.toml` file in `packages/source/feeds/` is baked into the binary
//! via [`include_str!`]. Runtime configuration may override the URL, but
//! the windowing and paging parameters come from here.

use serde::Deserialize;

/// A Socrata feed definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedDefinition {
    /// Unique identifier (e.g., `"sf_pd"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Socrata resource URL.
    pub api_url: String,
    /// Column used for the time window and ordering.
    pub date_column: String,
    /// How many days back from now to fetch.
    pub window_days: u32,
    /// Upper bound on records per fetch.
    pub max_records: u64,
    /// Records per page request.
    pub page_size: u64,
}

impl FeedDefinition {
    /// Returns a copy pointing at a different resource URL.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

/// TOML configs embedded at compile time.
const FEED_TOMLS: &[(&str, &str)] = &[("sf", include_str!("../feeds/sf.toml"))];

/// Parses a feed definition from TOML.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or missing fields.
pub fn parse_feed_toml(source: &str) -> Result<FeedDefinition, toml::de::Error> {
    toml::from_str(source)
}

/// Returns all embedded feed definitions.
///
/// # Panics
///
/// Panics if any embedded TOML config is malformed (a build-time
/// guarantee since the configs are embedded).
#[must_use]
pub fn all_feeds() -> Vec<FeedDefinition> {
    FEED_TOMLS
        .iter()
        .map(|(name, toml)| {
            parse_feed_toml(toml).unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"))
        })
        .collect()
}

/// Returns the San Francisco incident feed.
///
/// # Panics
///
/// Panics if the embedded SF definition is missing or malformed.
#[must_use]
pub fn sf_feed() -> FeedDefinition {
    all_feeds()
        .into_iter()
        .find(|f| f.id == "sf_pd")
        .unwrap_or_else(|| panic!("sf_pd feed definition missing"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_all_feeds() {
        assert_eq!(all_feeds().len(), FEED_TOMLS.len());
    }

    #[test]
    fn sf_feed_matches_expected_window() {
        let feed = sf_feed();
        assert_eq!(feed.api_url, "https://data.sfgov.org/resource/wg3w-h783.json");
        assert_eq!(feed.date_column, "incident_datetime");
        assert_eq!(feed.window_days, 180);
        assert_eq!(feed.max_records, 50_000);
        assert!(feed.page_size > 0);
    }

    #[test]
    fn rejects_incomplete_definition() {
        assert!(parse_feed_toml("id = \"x\"").is_err());
    }

    #[test]
    fn url_override_keeps_window() {
        let feed = sf_feed().with_api_url("http://localhost:9999/feed.json");
        assert_eq!(feed.api_url, "http://localhost:9999/feed.json");
        assert_eq!(feed.window_days, 180);
    }
}
