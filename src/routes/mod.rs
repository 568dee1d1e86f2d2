//! HTTP route handlers.
//!
//! - `browse`: files, thumbnails, directory listings and directory archives under the index root
//! - `health`: health, readiness, metrics and version endpoints

pub mod browse;
pub mod health;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::middleware;
use crate::state::AppState;

/// Builds the application router with request validation, tracing and security headers.
///
/// Compression and CORS are left to the binary.
pub fn router(state: AppState) -> Router {
    let cfg = state.config.clone();
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus))
        .route("/version", get(health::version))
        .route("/", get(browse::browse))
        .route("/{*path}", get(browse::browse))
        .with_state(state)
        .layer(from_fn(middleware::validation::validate_request_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(cfg, middleware::security_headers::security_headers_middleware))
}
