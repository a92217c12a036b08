//! HTTP route handlers for the quote service.
//!
//! All responses are JSON. Every route carries `Cache-Control: no-store` so
//! intermediate proxies never replay a stale quote or probe result. Unknown
//! paths get a JSON 404 listing the routable endpoints, and panics surface
//! as the generic 500 envelope instead of tearing down the connection.
//!
//! Every request runs inside a span carrying a generated request ID, tying
//! together the logs a single request emits.

pub mod diagnostics;
pub mod health;
pub mod quote;

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use http::header::{HeaderValue, CACHE_CONTROL};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::middleware::request_id_layer;
use crate::state::AppState;

/// Creates the Axum router with all routes, the JSON fallback, and layers.
pub fn create_router(state: AppState) -> Router {
    let quote_routes = Router::new().route("/", get(quote::random));

    // Probes - composite health plus the orchestrator liveness/readiness pair
    let probe_routes = Router::new()
        .route("/health", get(health::health))
        .route("/healthz", get(health::healthz))
        .route("/ready", get(health::ready));

    let diagnostic_routes = Router::new()
        .route("/test/connection", get(diagnostics::test_connection))
        .route("/metrics", get(diagnostics::metrics));

    Router::new()
        .merge(quote_routes)
        .merge(probe_routes)
        .merge(diagnostic_routes)
        .fallback(not_found)
        .with_state(state)
        // Panics become the generic 500 envelope
        .layer(CatchPanicLayer::custom(panic_response))
        // Probe results and quotes must never be served from a cache
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Outermost, so the request span covers the other layers too
        .layer(middleware::from_fn(request_id_layer))
}

/// JSON 404 for paths outside the route table.
async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not found",
            "message": "The requested endpoint does not exist",
            "available_endpoints": [
                "/",
                "/health",
                "/test/connection",
                "/metrics",
                "/healthz",
                "/ready",
            ],
        })),
    )
}

fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    tracing::error!("Unhandled panic in request handler: {detail}");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "Internal server error",
            "message": "An unexpected error occurred",
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}
