//! HTTP handler functions for the crime radius API.

use actix_web::{HttpResponse, web};
use crime_radius_incident_models::{DEFAULT_RADIUS_MILES, QueryBackend, RadiusResult};
use crime_radius_query::QueryError;
use crime_radius_server_models::{
    ApiError, ApiHealth, ApiIncident, ApiLocation, ApiNearbyResponse, ApiSummaryResponse,
    NearbyQueryParams,
};

use crate::AppState;

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let status = state.service.status();
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        incidents: status.incidents,
        indexable_incidents: status.indexable,
        fetched_at: status.fetched_at,
        age_seconds: status.age.map(|age| age.as_secs()),
        stale: status.stale,
        search_health: status.index_health,
    })
}

/// `GET /api/crime-data`
///
/// Returns every resident incident, loading the snapshot first if needed.
pub async fn crime_data(state: web::Data<AppState>) -> HttpResponse {
    match state.service.all_incidents().await {
        Ok(snapshot) => {
            let incidents: Vec<ApiIncident> =
                snapshot.incidents().iter().map(ApiIncident::from).collect();
            HttpResponse::Ok().json(incidents)
        }
        Err(e) => {
            log::error!("Failed to load crime data: {e}");
            HttpResponse::InternalServerError().json(ApiError::new("Failed to load crime data"))
        }
    }
}

/// `GET /api/crimes-nearby?lat=&lon=&radius=`
///
/// Returns incidents within `radius` miles (default 0.5) of the point.
pub async fn crimes_nearby(
    state: web::Data<AppState>,
    params: web::Query<NearbyQueryParams>,
) -> HttpResponse {
    let (location, radius) = match nearby_params(&params) {
        Ok(query) => query,
        Err(response) => return response,
    };

    match run_query(&state, location, radius).await {
        Ok(result) => HttpResponse::Ok().json(ApiNearbyResponse {
            count: result.count,
            crimes: result.records.into_iter().map(ApiIncident::from).collect(),
            location,
            radius,
            source: result.backend,
        }),
        Err(response) => response,
    }
}

/// `GET /api/crimes-nearby/summary?lat=&lon=&radius=`
///
/// Returns category and recency counts over every incident near the point,
/// not just the first page of a radius query.
pub async fn crimes_nearby_summary(
    state: web::Data<AppState>,
    params: web::Query<NearbyQueryParams>,
) -> HttpResponse {
    let (location, radius) = match nearby_params(&params) {
        Ok(query) => query,
        Err(response) => return response,
    };

    match state
        .service
        .summarize_radius(location.lat, location.lon, radius)
        .await
    {
        Ok(summary) => HttpResponse::Ok().json(ApiSummaryResponse {
            location,
            radius,
            total_crimes: summary.total,
            crime_types: summary.by_category,
            recent_crimes: summary.recent,
            top_crime_type: summary.top_category,
            source: QueryBackend::Fallback,
        }),
        Err(e) => query_error_response(e),
    }
}

fn nearby_params(params: &NearbyQueryParams) -> Result<(ApiLocation, f64), HttpResponse> {
    let (Some(lat), Some(lon)) = (params.lat, params.lon) else {
        return Err(HttpResponse::BadRequest().json(ApiError::new(
            "Latitude and longitude are required",
        )));
    };
    Ok((
        ApiLocation { lat, lon },
        params.radius.unwrap_or(DEFAULT_RADIUS_MILES),
    ))
}

async fn run_query(
    state: &AppState,
    location: ApiLocation,
    radius: f64,
) -> Result<RadiusResult, HttpResponse> {
    log::info!(
        "Searching crimes near ({}, {}) within {radius} miles",
        location.lat,
        location.lon
    );

    match state
        .service
        .query_radius(location.lat, location.lon, radius)
        .await
    {
        Ok(result) => {
            log::info!(
                "Found {} crimes within {radius} miles ({})",
                result.count,
                result.backend
            );
            Ok(result)
        }
        Err(e) => Err(query_error_response(e)),
    }
}

fn query_error_response(error: QueryError) -> HttpResponse {
    match error {
        QueryError::NoData => HttpResponse::ServiceUnavailable().json(ApiError::new(
            "Crime data not yet loaded. Please wait a moment.",
        )),
        e @ QueryError::InvalidInput { .. } => {
            HttpResponse::BadRequest().json(ApiError::new(e.to_string()))
        }
    }
}
