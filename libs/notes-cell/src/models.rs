// libs/notes-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::error::{AppError, FieldErrors};

/// Shown in place of note text whose ciphertext cannot be opened. A raw
/// decryption failure never propagates into rendering.
pub const DECRYPT_PLACEHOLDER: &str = "[could not decrypt]";

/// A clinical note as stored: content is ciphertext, never plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalNote {
    pub id: Uuid,
    pub psychologist_id: Uuid,
    pub patient_id: Uuid,
    /// Monotonically increasing per patient.
    pub session_number: i32,
    pub content_encrypted: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A note after decryption, the only shape handed to callers.
#[derive(Debug, Clone, Serialize)]
pub struct DecryptedNote {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub session_number: i32,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNoteRequest {
    pub content: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NoteError {
    #[error("Note not found or access denied")]
    NotFound,

    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Note encryption is not configured")]
    NotConfigured,

    #[error("Encryption failure: {0}")]
    Crypto(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<NoteError> for AppError {
    fn from(err: NoteError) -> Self {
        match err {
            NoteError::NotFound => AppError::NotFound("Note not found or access denied".to_string()),
            NoteError::Validation(fields) => AppError::Validation(fields),
            NoteError::NotConfigured => AppError::Internal("Note encryption is not configured".to_string()),
            NoteError::Crypto(msg) => AppError::Internal(msg),
            NoteError::Database(msg) => AppError::Database(msg),
        }
    }
}
