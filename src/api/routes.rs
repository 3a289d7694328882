use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::storage::Storage;

use super::handlers::{health_check, AppState};
use super::import::{batch_import_events, get_import_status, start_import};

pub fn create_api_router(storage: Arc<dyn Storage>, config: Arc<Config>) -> Router {
    let state = Arc::new(AppState { storage, config });

    Router::new()
        .route("/health", get(health_check))
        .route("/api/import/{site_id}", post(start_import))
        .route("/api/import/{site_id}/{import_id}", get(get_import_status))
        .route(
            "/api/batch-import-events/{site_id}/{import_id}",
            post(batch_import_events),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
