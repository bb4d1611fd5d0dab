// libs/schedule-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use shared_models::error::{AppError, FieldErrors};

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

/// Session lengths offered by the practice, in minutes.
pub const ALLOWED_DURATIONS: [i32; 4] = [30, 50, 60, 90];

/// How far in the past a "future" start time may drift before rejection,
/// so an in-flight form submission is not bounced by clock skew.
pub const SCHEDULING_GRACE_MINUTES: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub psychologist_id: Uuid,
    pub patient_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub modality: Modality,
    pub status: AppointmentStatus,
    pub meet_link: Option<String>,
    pub telepsy_consent: bool,
    pub session_price: f64,
    pub bill_as_session: bool,
    pub payment_status: PaymentStatus,
    pub notes: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + chrono::Duration::minutes(self.duration_minutes as i64)
    }

    /// Active appointments are the ones that participate in conflict
    /// checking: not tombstoned and not cancelled.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none() && self.status != AppointmentStatus::Cancelled
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Presencial,
    Online,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Presencial => write!(f, "presencial"),
            Modality::Online => write!(f, "online"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Completed, cancelled and no-show are terminal; the status of an
    /// appointment never regresses out of them.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AppointmentStatus::Scheduled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Overdue => write!(f, "overdue"),
            PaymentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub modality: Modality,
    pub notes: Option<String>,
    #[serde(default)]
    pub telepsy_consent: bool,
    #[serde(default)]
    pub session_price: f64,
    #[serde(default)]
    pub bill_as_session: bool,
}

/// Rescheduling moves the appointment in time and may switch modality.
/// Price and billing fields are deliberately absent: those are editable
/// only through creation or the billing endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_start_time: DateTime<Utc>,
    pub new_duration_minutes: i32,
    pub new_modality: Modality,
    pub notes: Option<String>,
    #[serde(default)]
    pub telepsy_consent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckQuery {
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub exclude_appointment_id: Option<Uuid>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum ScheduleError {
    #[error("Appointment not found or access denied")]
    NotFound,

    #[error("This time slot is already taken")]
    SlotTaken,

    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Appointment cannot change status from {0}")]
    InvalidStatusTransition(AppointmentStatus),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<ScheduleError> for AppError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::NotFound => AppError::NotFound("Appointment not found or access denied".to_string()),
            ScheduleError::SlotTaken => AppError::Conflict("This time slot is already taken".to_string()),
            ScheduleError::Validation(fields) => AppError::Validation(fields),
            ScheduleError::InvalidStatusTransition(status) => {
                AppError::BadRequest(format!("Appointment cannot change status from {}", status))
            }
            ScheduleError::Database(msg) => AppError::Database(msg),
        }
    }
}
