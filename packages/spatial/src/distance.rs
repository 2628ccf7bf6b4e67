//! Haversine great-circle distance in miles.

use crime_radius_incident_models::Coordinate;

/// Earth radius used for every distance computation, in miles.
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Returns the great-circle distance between `a` and `b` in miles.
///
/// Symmetric, and zero exactly when `a == b`. Callers must only pass
/// validated coordinates.
#[must_use]
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let half_lat = (d_lat / 2.0).sin();
    let half_lon = (d_lon / 2.0).sin();

    let h = half_lat.mul_add(
        half_lat,
        a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * half_lon * half_lon,
    );
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_MILES * c
}
