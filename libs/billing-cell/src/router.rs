// libs/billing-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn billing_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/invoices/ensure", post(handlers::ensure_monthly_invoice))
        .route("/invoices/{invoice_id}/settle", post(handlers::settle_invoice))
        .route("/appointments/{appointment_id}/settle", post(handlers::settle_appointment_payment))
        .route("/sweep", post(handlers::run_overdue_sweep))
        .route("/extract", get(handlers::financial_extract))
        .route("/records", post(handlers::create_financial_record))
        .route("/records", get(handlers::list_financial_records))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}
