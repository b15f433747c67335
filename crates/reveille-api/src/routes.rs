//! Router setup with all API routes and middleware.

use std::future::Future;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use reveille_core::error::ReveilleError;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Dashboards served from the API port or the next one up.
    let port = state.port();
    let origins: Vec<HeaderValue> = [port, port.saturating_add(1)]
        .iter()
        .flat_map(|p| {
            [
                format!("http://127.0.0.1:{}", p),
                format!("http://localhost:{}", p),
            ]
        })
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let item_routes = Router::new()
        .route(
            "/items",
            get(handlers::list_items)
                .post(handlers::create_item)
                .delete(handlers::delete_items),
        )
        .route(
            "/items/{id}",
            get(handlers::get_item)
                .put(handlers::update_item)
                .delete(handlers::delete_item),
        )
        .route("/items/{id}/reschedule", post(handlers::reschedule))
        .route("/items/{id}/snooze", post(handlers::snooze))
        .route("/items/{id}/stop", post(handlers::stop))
        .route("/items/{id}/enable", post(handlers::enable))
        .route("/items/{id}/disable", post(handlers::disable))
        .route("/stop-all", post(handlers::stop_all))
        .route("/notifications/action", post(handlers::notification_action));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/snapshot", get(handlers::snapshot))
        .route("/stream", get(handlers::stream))
        .merge(item_routes)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on localhost until `shutdown` resolves.
pub async fn start_server<F>(state: AppState, shutdown: F) -> Result<(), ReveilleError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("127.0.0.1:{}", state.port());
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ReveilleError::Api(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ReveilleError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
