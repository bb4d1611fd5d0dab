use std::sync::Arc;

use axum::{routing::get, Router};

use shared_config::AppConfig;

use billing_cell::router::billing_routes;
use notes_cell::router::notes_routes;
use patient_cell::router::patient_routes;
use schedule_cell::router::schedule_routes;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/appointments", schedule_routes(state.clone()))
        .nest("/api/patients", patient_routes(state.clone()))
        .nest("/api/billing", billing_routes(state.clone()))
        .nest("/api/notes", notes_routes(state))
}

async fn health_check() -> &'static str {
    "OK"
}
