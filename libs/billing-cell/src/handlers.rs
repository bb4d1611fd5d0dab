// libs/billing-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::Session;
use shared_models::error::AppError;

use crate::models::{CreateFinancialRecordRequest, EnsureInvoiceRequest, ExtractQuery, SettlePaymentRequest};
use crate::services::billing::BillingService;
use crate::services::finance::FinanceService;
use crate::services::overdue::OverdueSweepService;

#[axum::debug_handler]
pub async fn ensure_monthly_invoice(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(session): Extension<Session>,
    Json(request): Json<EnsureInvoiceRequest>,
) -> Result<Json<Value>, AppError> {
    let service = BillingService::new(&state);

    let outcome = service
        .ensure_monthly_invoice(
            session.tenant_id,
            request.patient_id,
            request.reference_date,
            auth.token(),
        )
        .await?;

    Ok(Json(json!({ "result": outcome })))
}

/// Runs the overdue sweep. The financial view calls this on load; repeated
/// invocation against a settled state updates nothing.
#[axum::debug_handler]
pub async fn run_overdue_sweep(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(session): Extension<Session>,
) -> Result<Json<Value>, AppError> {
    let service = OverdueSweepService::new(&state);

    let report = service
        .update_overdue_payments(session.tenant_id, auth.token())
        .await;

    Ok(Json(json!({ "report": report })))
}

#[axum::debug_handler]
pub async fn financial_extract(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(session): Extension<Session>,
    Query(query): Query<ExtractQuery>,
) -> Result<Json<Value>, AppError> {
    let service = FinanceService::new(&state);

    let extract = service
        .extract(session.tenant_id, &query, auth.token())
        .await?;

    Ok(Json(json!({ "extract": extract })))
}

#[axum::debug_handler]
pub async fn create_financial_record(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(session): Extension<Session>,
    Json(request): Json<CreateFinancialRecordRequest>,
) -> Result<Json<Value>, AppError> {
    let service = FinanceService::new(&state);

    let record = service
        .create_record(session.tenant_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "record": record
    })))
}

#[axum::debug_handler]
pub async fn list_financial_records(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(session): Extension<Session>,
    Query(query): Query<ExtractQuery>,
) -> Result<Json<Value>, AppError> {
    let service = FinanceService::new(&state);

    let records = service
        .list_records(session.tenant_id, &query, auth.token())
        .await?;

    Ok(Json(json!({ "records": records })))
}

#[axum::debug_handler]
pub async fn settle_invoice(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(session): Extension<Session>,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<SettlePaymentRequest>,
) -> Result<Json<Value>, AppError> {
    let service = FinanceService::new(&state);

    let invoice = service
        .settle_invoice(session.tenant_id, invoice_id, request.status, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "invoice": invoice
    })))
}

#[axum::debug_handler]
pub async fn settle_appointment_payment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(session): Extension<Session>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<SettlePaymentRequest>,
) -> Result<Json<Value>, AppError> {
    let service = FinanceService::new(&state);

    let appointment = service
        .settle_appointment_payment(session.tenant_id, appointment_id, request.status, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}
