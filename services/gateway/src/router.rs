use crate::handlers::{catalogue, ws};
use crate::state::AppState;
use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/items", get(catalogue::list_items).post(catalogue::create_item))
        .route("/items/{id}", get(catalogue::get_item))
        .route("/health", get(catalogue::health))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
