//! Runtime settings read from the environment.
//!
//! Every variable is optional. Unparseable numbers are logged and replaced
//! by their defaults.

use std::path::PathBuf;
use std::time::Duration;

use crime_radius_index::elasticsearch::{DEFAULT_INDEX, DEFAULT_URL};
use crime_radius_source::socrata::DEFAULT_FETCH_TIMEOUT;
use crime_radius_store::{StoreSettings, paths};

/// Feed URL override.
pub const FEED_URL_VAR: &str = "CRIME_FEED_URL";
/// Durable snapshot path; empty keeps snapshots in memory only.
pub const CACHE_FILE_VAR: &str = "CRIME_CACHE_FILE";
/// Snapshot time-to-live in hours.
pub const CACHE_TTL_HOURS_VAR: &str = "CRIME_CACHE_TTL_HOURS";
/// Remote fetch timeout in seconds.
pub const FETCH_TIMEOUT_SECS_VAR: &str = "CRIME_FETCH_TIMEOUT_SECS";
/// Search service URL; empty disables the indexed engine.
pub const ELASTICSEARCH_URL_VAR: &str = "ELASTICSEARCH_URL";
/// Alias the indexed engine reads from.
pub const ELASTICSEARCH_INDEX_VAR: &str = "ELASTICSEARCH_INDEX";
/// Seconds between maintenance passes.
pub const MAINTENANCE_INTERVAL_SECS_VAR: &str = "CRIME_MAINTENANCE_INTERVAL_SECS";

const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

/// Settings for [`crate::IncidentService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Overrides the embedded feed's API URL.
    pub feed_url: Option<String>,
    /// Durable snapshot file. `None` keeps snapshots in memory only.
    pub cache_file: Option<PathBuf>,
    /// Store TTL. [`crate::IncidentService::from_config`] replaces the fetch
    /// window and record cap with the feed definition's.
    pub store: StoreSettings,
    /// Time budget for one remote fetch.
    pub fetch_timeout: Duration,
    /// Search service URL. `None` disables the indexed engine.
    pub elasticsearch_url: Option<String>,
    /// Alias the indexed engine reads from.
    pub elasticsearch_index: String,
    /// Interval of the maintenance task.
    pub maintenance_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            feed_url: None,
            cache_file: Some(paths::default_cache_path()),
            store: StoreSettings::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            elasticsearch_url: Some(DEFAULT_URL.to_string()),
            elasticsearch_index: DEFAULT_INDEX.to_string(),
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
        }
    }
}

impl ServiceConfig {
    /// Reads settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`, falling back to defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let cache_file = match lookup(CACHE_FILE_VAR) {
            Some(path) if path.trim().is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => defaults.cache_file,
        };
        let elasticsearch_url = match lookup(ELASTICSEARCH_URL_VAR) {
            Some(url) if url.trim().is_empty() => None,
            Some(url) => Some(url),
            None => defaults.elasticsearch_url,
        };

        let ttl_hours = parse_or(
            &lookup,
            CACHE_TTL_HOURS_VAR,
            defaults.store.ttl.as_secs() / 3600,
        );
        let fetch_secs = parse_or(
            &lookup,
            FETCH_TIMEOUT_SECS_VAR,
            defaults.fetch_timeout.as_secs(),
        );
        let maintenance_secs = parse_or(
            &lookup,
            MAINTENANCE_INTERVAL_SECS_VAR,
            defaults.maintenance_interval.as_secs(),
        );

        Self {
            feed_url: lookup(FEED_URL_VAR).filter(|url| !url.trim().is_empty()),
            cache_file,
            store: StoreSettings {
                ttl: Duration::from_secs(ttl_hours.saturating_mul(3600)),
                ..defaults.store
            },
            fetch_timeout: Duration::from_secs(fetch_secs.max(1)),
            elasticsearch_url,
            elasticsearch_index: lookup(ELASTICSEARCH_INDEX_VAR)
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(defaults.elasticsearch_index),
            maintenance_interval: Duration::from_secs(maintenance_secs.max(1)),
        }
    }

    /// Sets the feed URL override.
    #[must_use]
    pub fn with_feed_url(mut self, url: impl Into<String>) -> Self {
        self.feed_url = Some(url.into());
        self
    }

    /// Sets or clears the durable snapshot file.
    #[must_use]
    pub fn with_cache_file(mut self, path: Option<PathBuf>) -> Self {
        self.cache_file = path;
        self
    }

    /// Sets or clears the search service URL.
    #[must_use]
    pub fn with_elasticsearch_url(mut self, url: Option<String>) -> Self {
        self.elasticsearch_url = url;
        self
    }
}

fn parse_or(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> u64 {
    let Some(raw) = lookup(name) else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|e| {
        log::warn!("Ignoring {name}={raw:?} ({e}), using {default}");
        default
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config(vars: &[(&str, &str)]) -> ServiceConfig {
        let vars: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = config(&[]);
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.store.ttl, Duration::from_secs(24 * 3600));
        assert_eq!(config.fetch_timeout, Duration::from_secs(60));
        assert_eq!(config.elasticsearch_url.as_deref(), Some("http://localhost:9200"));
        assert_eq!(config.elasticsearch_index, "sf-crimes");
        assert!(
            config
                .cache_file
                .unwrap()
                .ends_with("data/crime-data-cache.json")
        );
    }

    #[test]
    fn empty_values_disable_optional_backends() {
        let config = config(&[(CACHE_FILE_VAR, ""), (ELASTICSEARCH_URL_VAR, " ")]);
        assert!(config.cache_file.is_none());
        assert!(config.elasticsearch_url.is_none());
    }

    #[test]
    fn numeric_overrides_apply() {
        let config = config(&[
            (CACHE_TTL_HOURS_VAR, "6"),
            (FETCH_TIMEOUT_SECS_VAR, "15"),
            (MAINTENANCE_INTERVAL_SECS_VAR, "30"),
            (ELASTICSEARCH_INDEX_VAR, "oakland-crimes"),
            (FEED_URL_VAR, "http://feed.test/resource.json"),
        ]);
        assert_eq!(config.store.ttl, Duration::from_secs(6 * 3600));
        assert_eq!(config.fetch_timeout, Duration::from_secs(15));
        assert_eq!(config.maintenance_interval, Duration::from_secs(30));
        assert_eq!(config.elasticsearch_index, "oakland-crimes");
        assert_eq!(config.feed_url.as_deref(), Some("http://feed.test/resource.json"));
    }

    #[test]
    fn garbage_numbers_fall_back_to_defaults() {
        let config = config(&[(CACHE_TTL_HOURS_VAR, "soon"), (MAINTENANCE_INTERVAL_SECS_VAR, "0")]);
        assert_eq!(config.store.ttl, Duration::from_secs(24 * 3600));
        assert_eq!(config.maintenance_interval, Duration::from_secs(1));
    }
}
