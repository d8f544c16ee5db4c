//! API layer - routes, handlers, and middleware

pub mod handlers;
pub mod middleware;
pub mod resolver;

use crate::{config::WiringStyle, state::AppState};
use axum::{
    extract::State,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;

/// Create the main application router
///
/// `/` is served by the handler matching the configured wiring style.
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.server.cors_origins.clone();

    let visit = match state.config.wiring.style {
        WiringStyle::Constructor => get(resolver::scoped(handlers::register_visit)),
        WiringStyle::Locator => get(resolver::scoped(handlers::register_visit_located)),
        WiringStyle::Manual => get(handlers::manual_register_visit(state.counter.clone())),
    };

    Router::new()
        .route("/", visit)
        .route("/health", get(health_check))
        .with_state(state)
        // Add middleware (applied in reverse order)
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(middleware::cors(&cors_origins))
        .layer(middleware::trace())
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "tally",
        "wiring": state.config.wiring.style.as_str(),
    }))
}
