//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, admin, health, metered, stream};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for metered endpoints.
const METERED_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Subscriber (service key + caller headers)
/// - `POST /v1/accounts` - Open a ledger
/// - `GET /v1/balance` - Current balance
/// - `GET /v1/balance/stream` - Balance changes (server-sent events)
/// - `POST /v1/guard/check` - Authoritative guard check
/// - `POST /v1/metered` - Perform a metered operation
///
/// ## Admin (service key + admin role)
/// - `POST /v1/admin/adjust` - Credit a balance
/// - `POST /v1/admin/reset-monthly` - Reset the monthly allowance
/// - `GET /v1/admin/audit/:subscriber_id` - Audit trail
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    // Costed calls can be slow upstream; they get their own limit.
    let metered_routes = Router::new()
        .route("/guard/check", post(metered::check_guard))
        .route("/metered", post(metered::perform_metered))
        .layer(ConcurrencyLimitLayer::new(METERED_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        .route("/accounts", post(accounts::open_account))
        .route("/balance", get(accounts::get_balance))
        .route("/admin/adjust", post(admin::adjust_balance))
        .route("/admin/reset-monthly", post(admin::reset_monthly))
        .route("/admin/audit/:subscriber_id", get(admin::list_audit))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        .merge(metered_routes);

    // Long-lived streams are outside the request timeout and concurrency limits.
    let stream_routes = Router::new().route("/v1/balance/stream", get(stream::balance_stream));

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .merge(stream_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
