// libs/notes-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::Session;
use shared_models::error::AppError;

use crate::models::CreateNoteRequest;
use crate::services::notes::ClinicalNoteService;

#[axum::debug_handler]
pub async fn create_note(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(session): Extension<Session>,
    Path(patient_id): Path<Uuid>,
    Json(request): Json<CreateNoteRequest>,
) -> Result<Json<Value>, AppError> {
    let service = ClinicalNoteService::new(&state)?;

    let note = service
        .create_note(session.tenant_id, patient_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "note": note
    })))
}

#[axum::debug_handler]
pub async fn list_notes(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(session): Extension<Session>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = ClinicalNoteService::new(&state)?;

    let notes = service
        .list_notes(session.tenant_id, patient_id, auth.token())
        .await?;

    Ok(Json(json!({ "notes": notes })))
}
