// libs/notes-cell/src/services/notes.rs
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::error::FieldErrors;
use shared_utils::clock::{Clock, SystemClock};

use crate::models::{ClinicalNote, CreateNoteRequest, DecryptedNote, NoteError, DECRYPT_PLACEHOLDER};
use crate::services::crypto::NoteCrypto;

pub struct ClinicalNoteService {
    supabase: Arc<SupabaseClient>,
    crypto: NoteCrypto,
    clock: Arc<dyn Clock>,
}

impl ClinicalNoteService {
    pub fn new(config: &AppConfig) -> Result<Self, NoteError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Self, NoteError> {
        if !config.is_notes_configured() {
            return Err(NoteError::NotConfigured);
        }

        let crypto = NoteCrypto::new(&config.note_encryption_key)
            .map_err(|e| NoteError::Crypto(e.to_string()))?;

        Ok(Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            crypto,
            clock,
        })
    }

    /// Record a session note, encrypted at rest, with the next session
    /// number for the patient.
    ///
    /// Numbering reads the current maximum and increments it; concurrent
    /// writes for one patient are last-writer-wins like every other
    /// single-tenant mutation here.
    pub async fn create_note(
        &self,
        psychologist_id: Uuid,
        patient_id: Uuid,
        request: CreateNoteRequest,
        auth_token: &str,
    ) -> Result<DecryptedNote, NoteError> {
        debug!("Creating clinical note for patient {}", patient_id);

        if request.content.trim().is_empty() {
            let mut errors = FieldErrors::new();
            errors.push("content", "Note content is required");
            return Err(NoteError::Validation(errors));
        }

        let session_number = self
            .next_session_number(psychologist_id, patient_id, auth_token)
            .await?;

        let content_encrypted = self
            .crypto
            .encrypt(&request.content)
            .map_err(|e| NoteError::Crypto(e.to_string()))?;

        let now = self.clock.now();
        let note_data = json!({
            "psychologist_id": psychologist_id,
            "patient_id": patient_id,
            "session_number": session_number,
            "content_encrypted": content_encrypted,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/clinical_notes",
                Some(auth_token),
                Some(note_data),
                Some(headers),
            )
            .await
            .map_err(|e| {
                error!("Failed to create clinical note: {}", e);
                NoteError::Database(e.to_string())
            })?;

        let note = parse_note_rows(result)?
            .into_iter()
            .next()
            .ok_or_else(|| NoteError::Database("Insert returned no row".to_string()))?;

        info!(
            "Clinical note {} (session {}) recorded for patient {}",
            note.id, note.session_number, patient_id
        );

        // The plaintext just submitted is returned as-is; no decrypt round
        // trip on the write path.
        Ok(DecryptedNote {
            id: note.id,
            patient_id: note.patient_id,
            session_number: note.session_number,
            content: request.content,
            created_at: note.created_at,
        })
    }

    /// A patient's notes in session order, decrypted for display. A note
    /// whose ciphertext cannot be opened renders the placeholder instead of
    /// failing the whole listing.
    pub async fn list_notes(
        &self,
        psychologist_id: Uuid,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<DecryptedNote>, NoteError> {
        let path = format!(
            "/rest/v1/clinical_notes?psychologist_id=eq.{}&patient_id=eq.{}&deleted_at=is.null&order=session_number.asc",
            psychologist_id, patient_id
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| {
                error!("Failed to list clinical notes: {}", e);
                NoteError::Database(e.to_string())
            })?;

        let notes = parse_note_rows(result)?;

        Ok(notes
            .into_iter()
            .map(|note| {
                let content = match self.crypto.decrypt(&note.content_encrypted) {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        warn!("Could not decrypt note {}: {}", note.id, e);
                        DECRYPT_PLACEHOLDER.to_string()
                    }
                };

                DecryptedNote {
                    id: note.id,
                    patient_id: note.patient_id,
                    session_number: note.session_number,
                    content,
                    created_at: note.created_at,
                }
            })
            .collect())
    }

    async fn next_session_number(
        &self,
        psychologist_id: Uuid,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<i32, NoteError> {
        let path = format!(
            "/rest/v1/clinical_notes?psychologist_id=eq.{}&patient_id=eq.{}&deleted_at=is.null&order=session_number.desc&limit=1",
            psychologist_id, patient_id
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| {
                error!("Failed to read last session number: {}", e);
                NoteError::Database(e.to_string())
            })?;

        let last = parse_note_rows(result)?
            .into_iter()
            .next()
            .map(|note| note.session_number)
            .unwrap_or(0);

        Ok(last + 1)
    }
}

fn parse_note_rows(rows: Vec<Value>) -> Result<Vec<ClinicalNote>, NoteError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row)
                .map_err(|e| NoteError::Database(format!("Malformed note row: {}", e)))
        })
        .collect()
}
