// libs/patient-cell/src/services/patient.rs
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::error::FieldErrors;
use shared_utils::clock::{Clock, SystemClock};

use crate::models::{BillingModel, CreatePatientRequest, Patient, PatientError, UpdatePatientRequest};

pub struct PatientService {
    supabase: Arc<SupabaseClient>,
    clock: Arc<dyn Clock>,
}

impl PatientService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            clock,
        }
    }

    pub async fn create_patient(
        &self,
        psychologist_id: Uuid,
        request: CreatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        debug!("Creating patient record for psychologist {}", psychologist_id);

        validate_patient_fields(
            Some(&request.full_name),
            request.billing_model,
            request.monthly_price,
            request.payment_due_day,
        )?;

        if let Some(email) = &request.email {
            self.check_email_available(psychologist_id, email, auth_token).await?;
        }

        // Plan fields only persist under a monthly plan; under per-session
        // billing they are stored as null regardless of the submitted form.
        let on_plan = request.billing_model == Some(BillingModel::MonthlyPlan);
        let now = self.clock.now();

        let patient_data = json!({
            "psychologist_id": psychologist_id,
            "full_name": request.full_name,
            "email": request.email,
            "phone": request.phone,
            "billing_model": request.billing_model.map(|m| m.to_string()),
            "monthly_price": if on_plan { json!(request.monthly_price) } else { Value::Null },
            "payment_due_day": if on_plan { json!(request.payment_due_day) } else { Value::Null },
            "plan_start_date": if on_plan { json!(request.plan_start_date) } else { Value::Null },
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
                "/rest/v1/patients",
                Some(auth_token),
                Some(patient_data),
                Some(headers),
            )
            .await
            .map_err(|e| {
                error!("Failed to create patient: {}", e);
                PatientError::Database(e.to_string())
            })?;

        let patient = parse_patient_rows(result)?
            .into_iter()
            .next()
            .ok_or_else(|| PatientError::Database("Insert returned no row".to_string()))?;

        info!("Patient {} created", patient.id);
        Ok(patient)
    }

    pub async fn get_patient(
        &self,
        psychologist_id: Uuid,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        let path = format!(
            "/rest/v1/patients?id=eq.{}&psychologist_id=eq.{}&deleted_at=is.null",
            patient_id, psychologist_id
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| {
                error!("Failed to fetch patient: {}", e);
                PatientError::Database(e.to_string())
            })?;

        parse_patient_rows(result)?
            .into_iter()
            .next()
            .ok_or(PatientError::NotFound)
    }

    pub async fn list_patients(
        &self,
        psychologist_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Patient>, PatientError> {
        let path = format!(
            "/rest/v1/patients?psychologist_id=eq.{}&deleted_at=is.null&order=full_name.asc",
            psychologist_id
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| {
                error!("Failed to list patients: {}", e);
                PatientError::Database(e.to_string())
            })?;

        parse_patient_rows(result)
    }

    pub async fn update_patient(
        &self,
        psychologist_id: Uuid,
        patient_id: Uuid,
        request: UpdatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        debug!("Updating patient {}", patient_id);

        validate_patient_fields(
            request.full_name.as_deref(),
            request.billing_model,
            request.monthly_price,
            request.payment_due_day,
        )?;

        let current = self.get_patient(psychologist_id, patient_id, auth_token).await?;

        let mut update_data = serde_json::Map::new();

        if let Some(full_name) = request.full_name {
            update_data.insert("full_name".to_string(), json!(full_name));
        }
        if let Some(email) = request.email {
            update_data.insert("email".to_string(), json!(email));
        }
        if let Some(phone) = request.phone {
            update_data.insert("phone".to_string(), json!(phone));
        }
        if let Some(billing_model) = request.billing_model {
            update_data.insert("billing_model".to_string(), json!(billing_model.to_string()));

            // Leaving the monthly plan clears its configuration.
            if billing_model == BillingModel::PerSession {
                update_data.insert("monthly_price".to_string(), Value::Null);
                update_data.insert("payment_due_day".to_string(), Value::Null);
                update_data.insert("plan_start_date".to_string(), Value::Null);
            }
        }

        let effective_model = request.billing_model.or(current.billing_model);
        if effective_model == Some(BillingModel::MonthlyPlan) {
            if let Some(monthly_price) = request.monthly_price {
                update_data.insert("monthly_price".to_string(), json!(monthly_price));
            }
            if let Some(payment_due_day) = request.payment_due_day {
                update_data.insert("payment_due_day".to_string(), json!(payment_due_day));
            }
            if let Some(plan_start_date) = request.plan_start_date {
                update_data.insert("plan_start_date".to_string(), json!(plan_start_date));
            }
        }

        update_data.insert("updated_at".to_string(), json!(self.clock.now().to_rfc3339()));

        let path = format!(
            "/rest/v1/patients?id=eq.{}&psychologist_id=eq.{}",
            patient_id, psychologist_id
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
                Some(Value::Object(update_data)),
                Some(headers),
            )
            .await
            .map_err(|e| {
                error!("Failed to update patient: {}", e);
                PatientError::Database(e.to_string())
            })?;

        parse_patient_rows(result)?
            .into_iter()
            .next()
            .ok_or(PatientError::NotFound)
    }

    /// Soft-delete a patient, cascading through their open business state.
    ///
    /// Four independent steps: cancel + tombstone future scheduled
    /// appointments (history stays), cancel open appointment payments
    /// regardless of date, cancel open monthly invoices, then tombstone the
    /// patient. The first three log and continue on failure so one broken
    /// step cannot strand the rest; only the final tombstone is a hard
    /// error.
    pub async fn delete_patient(
        &self,
        psychologist_id: Uuid,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<(), PatientError> {
        info!("Soft-deleting patient {} with cascade", patient_id);

        self.get_patient(psychologist_id, patient_id, auth_token).await?;

        let now = self.clock.now();
        let now_str = now.to_rfc3339();

        // Step 1: future scheduled appointments are cancelled and tombstoned.
        let future_appointments_path = format!(
            "/rest/v1/appointments?psychologist_id=eq.{}&patient_id=eq.{}&status=eq.scheduled&deleted_at=is.null&start_time=gte.{}",
            psychologist_id,
            patient_id,
            urlencoding::encode(&now_str)
        );
        self.cascade_update(
            &future_appointments_path,
            json!({
                "status": "cancelled",
                "deleted_at": now_str,
                "updated_at": now_str
            }),
            auth_token,
            "cancel future appointments",
        )
        .await;

        // Step 2: open payment obligations are cancelled for every
        // appointment, past ones included.
        let payments_path = format!(
            "/rest/v1/appointments?psychologist_id=eq.{}&patient_id=eq.{}&payment_status=in.(pending,overdue)",
            psychologist_id, patient_id
        );
        self.cascade_update(
            &payments_path,
            json!({
                "payment_status": "cancelled",
                "updated_at": now_str
            }),
            auth_token,
            "cancel open appointment payments",
        )
        .await;

        // Step 3: open monthly invoices are cancelled.
        let invoices_path = format!(
            "/rest/v1/monthly_invoices?psychologist_id=eq.{}&patient_id=eq.{}&status=in.(pending,overdue)&deleted_at=is.null",
            psychologist_id, patient_id
        );
        self.cascade_update(
            &invoices_path,
            json!({
                "status": "cancelled",
                "updated_at": now_str
            }),
            auth_token,
            "cancel open monthly invoices",
        )
        .await;

        // Step 4: tombstone the patient record itself.
        let patient_path = format!(
            "/rest/v1/patients?id=eq.{}&psychologist_id=eq.{}",
            patient_id, psychologist_id
        );

        let _: Vec<Value> = self
            .supabase
            .request(
                Method::PATCH,
                &patient_path,
                Some(auth_token),
                Some(json!({
                    "deleted_at": now_str,
                    "updated_at": now_str
                })),
            )
            .await
            .map_err(|e| {
                error!("Failed to tombstone patient {}: {}", patient_id, e);
                PatientError::Database(e.to_string())
            })?;

        info!("Patient {} soft-deleted", patient_id);
        Ok(())
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn check_email_available(
        &self,
        psychologist_id: Uuid,
        email: &str,
        auth_token: &str,
    ) -> Result<(), PatientError> {
        let path = format!(
            "/rest/v1/patients?psychologist_id=eq.{}&email=eq.{}&deleted_at=is.null",
            psychologist_id,
            urlencoding::encode(email)
        );

        let existing: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| {
                error!("Failed to check patient email: {}", e);
                PatientError::Database(e.to_string())
            })?;

        if existing.is_empty() {
            Ok(())
        } else {
            let mut errors = FieldErrors::new();
            errors.push("email", "A patient with this email already exists");
            Err(PatientError::Validation(errors))
        }
    }

    /// One cascade step: bulk-update by filter, log the outcome, never fail.
    async fn cascade_update(&self, path: &str, body: Value, auth_token: &str, step: &str) {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        match self
            .supabase
            .request_with_headers::<Vec<Value>>(
                Method::PATCH,
                path,
                Some(auth_token),
                Some(body),
                Some(headers),
            )
            .await
        {
            Ok(rows) => debug!("Patient deletion cascade: {} updated {} rows", step, rows.len()),
            Err(e) => warn!("Patient deletion cascade: failed to {}: {}", step, e),
        }
    }
}

fn validate_patient_fields(
    full_name: Option<&str>,
    billing_model: Option<BillingModel>,
    monthly_price: Option<f64>,
    payment_due_day: Option<u32>,
) -> Result<(), PatientError> {
    let mut errors = FieldErrors::new();

    if let Some(name) = full_name {
        if name.trim().is_empty() {
            errors.push("full_name", "Name is required");
        }
    }

    if billing_model == Some(BillingModel::MonthlyPlan) {
        if let Some(price) = monthly_price {
            if price < 0.0 {
                errors.push("monthly_price", "Monthly price cannot be negative");
            }
        }
        if let Some(day) = payment_due_day {
            if !(1..=31).contains(&day) {
                errors.push("payment_due_day", "Due day must be between 1 and 31");
            }
        }
    }

    errors.into_result().map_err(PatientError::Validation)
}

fn parse_patient_rows(rows: Vec<Value>) -> Result<Vec<Patient>, PatientError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row)
                .map_err(|e| PatientError::Database(format!("Malformed patient row: {}", e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn due_day_out_of_range_is_rejected() {
        let result = validate_patient_fields(
            Some("Ana"),
            Some(BillingModel::MonthlyPlan),
            Some(600.0),
            Some(32),
        );
        assert_matches!(result, Err(PatientError::Validation(ref f)) if f.0.contains_key("payment_due_day"));
    }

    #[test]
    fn plan_fields_are_not_checked_for_per_session_patients() {
        // Stale plan values on a per-session form submission are ignored.
        let result = validate_patient_fields(
            Some("Ana"),
            Some(BillingModel::PerSession),
            Some(-1.0),
            Some(99),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn blank_name_is_rejected() {
        let result = validate_patient_fields(Some("   "), None, None, None);
        assert_matches!(result, Err(PatientError::Validation(ref f)) if f.0.contains_key("full_name"));
    }
}
