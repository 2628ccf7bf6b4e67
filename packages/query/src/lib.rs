#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Radius queries over the incident snapshot.
//!
//! [`router::QueryRouter`] picks the indexed engine when its last probe
//! succeeded and falls back to brute-force filtering otherwise.
//! [`refresh::CacheRefreshPolicy`] decides when the store reloads and keeps
//! the index in step with it. [`service::IncidentService`] wires both to a
//! [`config::ServiceConfig`] for the HTTP adapter.

pub mod config;
pub mod refresh;
pub mod router;
pub mod service;
pub mod summary;

#[cfg(test)]
mod testing;

pub use config::ServiceConfig;
pub use refresh::CacheRefreshPolicy;
pub use router::QueryRouter;
pub use service::{IncidentService, ServiceError, ServiceStatus};
pub use summary::{CrimeSummary, summarize};

/// Errors returned to query consumers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// No snapshot is resident and the indexed engine cannot answer.
    #[error("Crime data not yet loaded")]
    NoData,

    /// The query center or radius is unusable.
    #[error("Invalid query: {message}")]
    InvalidInput {
        /// Description of what went wrong.
        message: String,
    },
}
