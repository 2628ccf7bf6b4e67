#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Great-circle distance and brute-force radius filtering.
//!
//! [`distance::distance`] is the single source of truth for "how far apart
//! are two incidents"; [`fallback::FallbackQueryEngine`] answers radius
//! queries with it when the geo-indexed search service is not usable.

pub mod distance;
pub mod fallback;

pub use distance::{EARTH_RADIUS_MILES, distance};
pub use fallback::FallbackQueryEngine;
