// libs/schedule-cell/src/services/booking.rs
use chrono::{Duration as ChronoDuration, NaiveDate};
use rand::Rng;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::error::FieldErrors;
use shared_utils::clock::{Clock, SystemClock};

use crate::models::{
    Appointment, AppointmentStatus, ConflictCheckQuery, CreateAppointmentRequest, Modality,
    PaymentStatus, RescheduleAppointmentRequest, ScheduleError, ALLOWED_DURATIONS,
    SCHEDULING_GRACE_MINUTES,
};
use crate::services::conflict::ConflictCheckService;

pub struct AppointmentBookingService {
    supabase: Arc<SupabaseClient>,
    conflict_service: ConflictCheckService,
    clock: Arc<dyn Clock>,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let conflict_service = ConflictCheckService::new(Arc::clone(&supabase));

        Self {
            supabase,
            conflict_service,
            clock,
        }
    }

    /// Book a new appointment.
    ///
    /// Validation and the conflict check both run before any write; a
    /// rejected booking leaves no trace in the store. Monthly invoices are
    /// never generated here; staff trigger those explicitly through the
    /// billing endpoints.
    pub async fn create_appointment(
        &self,
        psychologist_id: Uuid,
        request: CreateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        info!(
            "Booking appointment for psychologist {} patient {}",
            psychologist_id, request.patient_id
        );

        self.validate_booking(
            request.start_time,
            request.duration_minutes,
            Some(request.session_price),
        )?;

        let has_conflict = self
            .conflict_service
            .has_conflict(
                psychologist_id,
                request.start_time,
                request.duration_minutes,
                None,
                auth_token,
            )
            .await;

        if has_conflict {
            return Err(ScheduleError::SlotTaken);
        }

        let meet_link = match request.modality {
            Modality::Online => Some(generate_meet_link()),
            Modality::Presencial => None,
        };

        let now = self.clock.now();
        let appointment_data = json!({
            "psychologist_id": psychologist_id,
            "patient_id": request.patient_id,
            "start_time": request.start_time.to_rfc3339(),
            "duration_minutes": request.duration_minutes,
            "modality": request.modality.to_string(),
            "status": AppointmentStatus::Scheduled.to_string(),
            "meet_link": meet_link,
            "telepsy_consent": request.telepsy_consent,
            "session_price": request.session_price,
            "bill_as_session": request.bill_as_session,
            "payment_status": PaymentStatus::Pending.to_string(),
            "notes": request.notes,
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
                "/rest/v1/appointments",
                Some(auth_token),
                Some(appointment_data),
                Some(headers),
            )
            .await
            .map_err(|e| {
                error!("Failed to create appointment: {}", e);
                ScheduleError::Database(e.to_string())
            })?;

        let appointment = parse_appointment_rows(result)?
            .into_iter()
            .next()
            .ok_or_else(|| ScheduleError::Database("Insert returned no row".to_string()))?;

        info!("Appointment {} booked successfully", appointment.id);
        Ok(appointment)
    }

    /// Move an existing appointment to a new slot, re-running the conflict
    /// check with the appointment excluded from its own comparison set.
    pub async fn reschedule_appointment(
        &self,
        psychologist_id: Uuid,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        debug!("Rescheduling appointment {}", appointment_id);

        self.validate_booking(request.new_start_time, request.new_duration_minutes, None)?;

        let current = self
            .get_appointment(psychologist_id, appointment_id, auth_token)
            .await?;

        let has_conflict = self
            .conflict_service
            .has_conflict(
                psychologist_id,
                request.new_start_time,
                request.new_duration_minutes,
                Some(appointment_id),
                auth_token,
            )
            .await;

        if has_conflict {
            return Err(ScheduleError::SlotTaken);
        }

        // An online switch keeps a pre-existing link; a presencial switch
        // drops the link entirely.
        let meet_link = match request.new_modality {
            Modality::Online => current.meet_link.clone().or_else(|| Some(generate_meet_link())),
            Modality::Presencial => None,
        };

        let update_data = json!({
            "start_time": request.new_start_time.to_rfc3339(),
            "duration_minutes": request.new_duration_minutes,
            "modality": request.new_modality.to_string(),
            "meet_link": meet_link,
            "notes": request.notes,
            "telepsy_consent": request.telepsy_consent,
            "updated_at": self.clock.now().to_rfc3339()
        });

        self.patch_appointment(psychologist_id, appointment_id, update_data, auth_token)
            .await
    }

    /// Close out an appointment. Only forward transitions out of
    /// `scheduled` are accepted; terminal statuses never change again.
    pub async fn set_status(
        &self,
        psychologist_id: Uuid,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        debug!("Setting appointment {} status to {}", appointment_id, new_status);

        let current = self
            .get_appointment(psychologist_id, appointment_id, auth_token)
            .await?;

        validate_status_transition(current.status, new_status)?;

        let update_data = json!({
            "status": new_status.to_string(),
            "updated_at": self.clock.now().to_rfc3339()
        });

        self.patch_appointment(psychologist_id, appointment_id, update_data, auth_token)
            .await
    }

    /// Tombstone an appointment. The record stays for history but leaves
    /// every active-set query and the conflict comparison set. Payment and
    /// invoice records are untouched; only the patient deletion path
    /// cascades into those.
    pub async fn soft_delete(
        &self,
        psychologist_id: Uuid,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        debug!("Soft-deleting appointment {}", appointment_id);

        // Scoped load first so a foreign tenant's id reports not-found
        // instead of silently matching nothing.
        self.get_appointment(psychologist_id, appointment_id, auth_token)
            .await?;

        let update_data = json!({
            "deleted_at": self.clock.now().to_rfc3339(),
            "updated_at": self.clock.now().to_rfc3339()
        });

        self.patch_appointment(psychologist_id, appointment_id, update_data, auth_token)
            .await?;

        info!("Appointment {} soft-deleted", appointment_id);
        Ok(())
    }

    pub async fn get_appointment(
        &self,
        psychologist_id: Uuid,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&psychologist_id=eq.{}&deleted_at=is.null",
            appointment_id, psychologist_id
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| {
                error!("Failed to fetch appointment: {}", e);
                ScheduleError::Database(e.to_string())
            })?;

        parse_appointment_rows(result)?
            .into_iter()
            .next()
            .ok_or(ScheduleError::NotFound)
    }

    /// Appointments of one calendar day, the agenda grid's data source.
    pub async fn list_day(
        &self,
        psychologist_id: Uuid,
        day: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, ScheduleError> {
        let day_start = day.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let day_end = day_start + ChronoDuration::days(1);

        let path = format!(
            "/rest/v1/appointments?psychologist_id=eq.{}&deleted_at=is.null&start_time=gte.{}&start_time=lt.{}&order=start_time.asc",
            psychologist_id,
            urlencoding::encode(&day_start.to_rfc3339()),
            urlencoding::encode(&day_end.to_rfc3339())
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| {
                error!("Failed to list day agenda: {}", e);
                ScheduleError::Database(e.to_string())
            })?;

        parse_appointment_rows(result)
    }

    pub async fn check_conflict(
        &self,
        psychologist_id: Uuid,
        query: ConflictCheckQuery,
        auth_token: &str,
    ) -> bool {
        self.conflict_service
            .has_conflict(
                psychologist_id,
                query.start_time,
                query.duration_minutes,
                query.exclude_appointment_id,
                auth_token,
            )
            .await
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    fn validate_booking(
        &self,
        start_time: chrono::DateTime<chrono::Utc>,
        duration_minutes: i32,
        session_price: Option<f64>,
    ) -> Result<(), ScheduleError> {
        let mut errors = FieldErrors::new();

        let grace = ChronoDuration::minutes(SCHEDULING_GRACE_MINUTES);
        if start_time < self.clock.now() - grace {
            errors.push("start_time", "Appointment must be scheduled for a future time");
        }

        if !ALLOWED_DURATIONS.contains(&duration_minutes) {
            errors.push(
                "duration_minutes",
                format!("Duration must be one of {:?} minutes", ALLOWED_DURATIONS),
            );
        }

        if let Some(price) = session_price {
            if price < 0.0 {
                errors.push("session_price", "Session price cannot be negative");
            }
        }

        errors.into_result().map_err(ScheduleError::Validation)
    }

    async fn patch_appointment(
        &self,
        psychologist_id: Uuid,
        appointment_id: Uuid,
        update_data: Value,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&psychologist_id=eq.{}",
            appointment_id, psychologist_id
        );

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update_data),
                Some(headers),
            )
            .await
            .map_err(|e| {
                error!("Failed to update appointment: {}", e);
                ScheduleError::Database(e.to_string())
            })?;

        parse_appointment_rows(result)?
            .into_iter()
            .next()
            .ok_or(ScheduleError::NotFound)
    }
}

/// Decode store rows into typed appointments, rejecting malformed rows
/// instead of trusting them downstream.
fn parse_appointment_rows(rows: Vec<Value>) -> Result<Vec<Appointment>, ScheduleError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row)
                .map_err(|e| ScheduleError::Database(format!("Malformed appointment row: {}", e)))
        })
        .collect()
}

pub fn validate_status_transition(
    current: AppointmentStatus,
    new_status: AppointmentStatus,
) -> Result<(), ScheduleError> {
    if current.is_terminal() || !new_status.is_terminal() {
        return Err(ScheduleError::InvalidStatusTransition(current));
    }
    Ok(())
}

/// A meeting link in the shape of a third-party video-conferencing room:
/// three lowercase letter groups (3-4-3) joined by hyphens. The randomness
/// is cosmetic, not security-sensitive.
pub fn generate_meet_link() -> String {
    format!(
        "https://meet.google.com/{}-{}-{}",
        random_letter_group(3),
        random_letter_group(4),
        random_letter_group(3)
    )
}

fn random_letter_group(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}
