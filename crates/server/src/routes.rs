//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        // Administrative actions
        .route("/v1/actions/{action}", post(handlers::dispatch_action))
        // Ingestion; line length is bounded by the codec instead of the body limit
        .route(
            "/v1/topics/{topic_id}/stream",
            put(handlers::ingest_stream).layer(DefaultBodyLimit::disable()),
        )
        // Retrieval
        .route("/v1/resolve", post(handlers::resolve))
        .route("/v1/streams/{handle}", get(handlers::stream))
        // Operator endpoints
        .route("/v1/admin/recover", post(handlers::run_recovery))
        .route("/v1/admin/gc", post(handlers::run_gc));

    let mut router = Router::new().merge(api_routes);

    // When enabled, this endpoint should be reachable by the scraper only.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
