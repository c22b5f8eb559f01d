//! API routes

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use dripmail_common::config::ApiConfig;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::handlers::{campaigns, health, sequences};
use crate::openapi::create_openapi_routes;
use crate::state::AppState;

/// CORS policy from the configured origins; none configured means no CORS
/// headers are added
fn cors_layer(config: &ApiConfig) -> Option<CorsLayer> {
    if config.cors_origins.is_empty() {
        return None;
    }

    if config.cors_origins.iter().any(|o| o == "*") {
        return Some(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>, config: &ApiConfig) -> Router {
    // Health check routes
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness));

    // Sequence routes
    let sequence_routes = Router::new()
        .route(
            "/",
            get(sequences::list_sequences).post(sequences::create_sequence),
        )
        .route(
            "/:sequence_id",
            get(sequences::get_sequence)
                .put(sequences::replace_sequence)
                .delete(sequences::delete_sequence),
        );

    // Campaign routes
    let campaign_routes = Router::new()
        .route(
            "/",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        .route(
            "/:campaign_id",
            get(campaigns::get_campaign).delete(campaigns::delete_campaign),
        )
        .route("/:campaign_id/start", post(campaigns::start_campaign))
        .route("/:campaign_id/pause", post(campaigns::pause_campaign))
        .route("/:campaign_id/retry-failed", post(campaigns::retry_failed))
        .route(
            "/:campaign_id/contacts",
            get(campaigns::list_contacts).post(campaigns::add_contacts),
        );

    let api_v1 = Router::new()
        .nest("/sequences", sequence_routes)
        .nest("/campaigns", campaign_routes);

    let router = Router::new()
        .nest("/health", health_routes)
        .nest("/api/v1", api_v1)
        .with_state(state)
        .merge(create_openapi_routes());

    match cors_layer(config) {
        Some(cors) => router.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        ),
        None => router.layer(TraceLayer::new_for_http()),
    }
}
