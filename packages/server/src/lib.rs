#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for nearby crime queries.
//!
//! Serves radius queries over the San Francisco incident feed. Queries go
//! to Elasticsearch when it is reachable and fall back to in-process
//! filtering over the cached snapshot otherwise. The snapshot is loaded in
//! the background at startup and refreshed by a maintenance task.

mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use crime_radius_query::{IncidentService, ServiceConfig};

/// Shared application state.
pub struct AppState {
    /// Incident store, engines and refresh policy.
    pub service: Arc<IncidentService>,
}

/// Registers the API routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/crime-data", web::get().to(handlers::crime_data))
            .route("/crimes-nearby", web::get().to(handlers::crimes_nearby))
            .route(
                "/crimes-nearby/summary",
                web::get().to(handlers::crimes_nearby_summary),
            ),
    );
}

/// Starts the crime radius API server.
///
/// Reads [`ServiceConfig`] from the environment, starts loading the
/// incident snapshot in the background, spawns the maintenance task, and
/// serves the API. This is a regular async function; the caller is
/// responsible for providing the async runtime (e.g. via
/// `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the service clients cannot be
/// built, or the HTTP server fails to bind or encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = ServiceConfig::from_env();
    log::info!("Starting incident service...");
    let service = Arc::new(IncidentService::from_config(&config).map_err(std::io::Error::other)?);

    let starting = Arc::clone(&service);
    actix_web::rt::spawn(async move { starting.start().await });
    let _maintenance = service.spawn_maintenance();

    let state = web::Data::new(AppState { service });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
