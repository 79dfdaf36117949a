pub mod auth;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::service::SyncOrchestrator;

pub use error::ApiError;
pub use handlers::*;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub internal_bearer: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/holded/invoices/import-incremental",
            get(import_incremental).post(import_incremental),
        )
        .route(
            "/api/holded/incremental",
            get(import_incremental).post(import_incremental),
        )
        .route("/api/holded/sync/last-run", get(last_run))
        .with_state(state)
}
