#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Remote incident feed trait and the Socrata windowed fetcher.
//!
//! The store only ever talks to an [`IncidentSource`]. The production
//! implementation is [`socrata::SocrataSource`], configured from the feed
//! definitions embedded in [`feed`].

pub mod feed;
pub mod parsing;
pub mod retry;
pub mod socrata;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use crime_radius_incident_models::IncidentRecord;

/// Errors that can occur while fetching from the remote feed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The feed answered with a non-success status.
    #[error("Feed returned HTTP {status}")]
    Status {
        /// Final status code.
        status: reqwest::StatusCode,
    },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The response parsed but did not have the expected shape.
    #[error("Malformed feed response: {message}")]
    Malformed {
        /// Description of what went wrong.
        message: String,
    },

    /// The whole fetch exceeded its time budget.
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// The slice of the feed to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Only fetch records at or after this timestamp.
    pub since: DateTime<Utc>,
    /// Maximum number of records to fetch.
    pub limit: u64,
}

impl FetchOptions {
    /// Options covering the `window_days` before `now`, capped at `limit`.
    #[must_use]
    pub fn window(now: DateTime<Utc>, window_days: u32, limit: u64) -> Self {
        Self {
            since: now - TimeDelta::days(i64::from(window_days)),
            limit,
        }
    }
}

/// A remote source of incident records.
#[async_trait]
pub trait IncidentSource: Send + Sync {
    /// Returns a unique identifier for this source (e.g., `"sf_pd"`).
    fn id(&self) -> &str;

    /// Fetches every record in the requested window, in feed order.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the feed is unreachable, answers with an
    /// error, returns a malformed body, or exceeds its timeout.
    async fn fetch(&self, options: &FetchOptions) -> Result<Vec<IncidentRecord>, FetchError>;
}
