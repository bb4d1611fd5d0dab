// libs/billing-cell/src/services/billing.rs
use chrono::{Datelike, NaiveDate};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use patient_cell::models::{BillingModel, Patient};
use schedule_cell::models::Appointment;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::clock::{Clock, SystemClock};

use crate::models::{
    BillingError, EnsureInvoiceOutcome, InvoiceStatus, MonthlyInvoice, DEFAULT_MONTHLY_PRICE,
};

/// Which revenue track an appointment belongs to.
///
/// Per-session patients (and patients with no billing model at all) always
/// bill by the session. A monthly-plan patient's appointment only bills as
/// a session when it carries the explicit override flag; otherwise its
/// revenue is represented by the plan's invoice.
pub fn is_billable_as_session(patient: &Patient, appointment: &Appointment) -> bool {
    match patient.billing_model {
        Some(BillingModel::MonthlyPlan) => appointment.bill_as_session,
        Some(BillingModel::PerSession) | None => true,
    }
}

/// Due date of an invoice for `reference_month`, given the patient's
/// configured due day.
///
/// The day is clamped to the month's length (due day 31 in February lands
/// on the 28th/29th). If the computed date has already elapsed the due date
/// rolls to the same day of the following month, so an invoice generated
/// late is never born overdue.
pub fn compute_due_date(reference_month: NaiveDate, due_day: u32, today: NaiveDate) -> NaiveDate {
    let due = day_in_month(reference_month.year(), reference_month.month(), due_day);
    if due < today {
        let (year, month) = next_month(reference_month.year(), reference_month.month());
        day_in_month(year, month, due_day)
    } else {
        due
    }
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap()
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn day_in_month(year: i32, month: u32, day: u32) -> NaiveDate {
    let (next_year, next_month) = next_month(year, month);
    let last_day = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap()
        .pred_opt()
        .unwrap()
        .day();
    NaiveDate::from_ymd_opt(year, month, day.clamp(1, last_day)).unwrap()
}

pub struct BillingService {
    supabase: Arc<SupabaseClient>,
    clock: Arc<dyn Clock>,
}

impl BillingService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            clock,
        }
    }

    /// Make sure a monthly-plan patient has an invoice for the month of
    /// `reference_date`, creating one if missing.
    ///
    /// Idempotent: an existing non-deleted invoice for the month
    /// short-circuits, so the financial view may call this on every load.
    /// Never triggered implicitly by booking; invoice creation is a
    /// deliberate staff action.
    pub async fn ensure_monthly_invoice(
        &self,
        psychologist_id: Uuid,
        patient_id: Uuid,
        reference_date: NaiveDate,
        auth_token: &str,
    ) -> Result<EnsureInvoiceOutcome, BillingError> {
        debug!(
            "Ensuring monthly invoice for patient {} in month of {}",
            patient_id, reference_date
        );

        let patient = self.get_patient(psychologist_id, patient_id, auth_token).await?;

        if patient.billing_model != Some(BillingModel::MonthlyPlan) {
            debug!("Patient {} is not on a monthly plan, nothing to do", patient_id);
            return Ok(EnsureInvoiceOutcome::NotApplicable);
        }

        let reference_month = first_of_month(reference_date);

        let path = format!(
            "/rest/v1/monthly_invoices?psychologist_id=eq.{}&patient_id=eq.{}&reference_month=eq.{}&deleted_at=is.null",
            psychologist_id,
            patient_id,
            reference_month.format("%Y-%m-%d")
        );

        let existing: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| {
                error!("Failed to look up existing invoice: {}", e);
                BillingError::Database(e.to_string())
            })?;

        if let Some(row) = existing.into_iter().next() {
            let invoice = parse_invoice(row)?;
            debug!("Invoice already exists for patient {} in {}", patient_id, reference_month);
            return Ok(EnsureInvoiceOutcome::AlreadyExists { invoice });
        }

        let due_day = patient.payment_due_day.unwrap_or(1);
        let due_date = compute_due_date(reference_month, due_day, self.clock.today());
        let amount = patient.monthly_price.unwrap_or(DEFAULT_MONTHLY_PRICE);

        let now = self.clock.now();
        let invoice_data = json!({
            "psychologist_id": psychologist_id,
            "patient_id": patient_id,
            "reference_month": reference_month.format("%Y-%m-%d").to_string(),
            "amount": amount,
            "due_date": due_date.format("%Y-%m-%d").to_string(),
            "status": InvoiceStatus::Pending.to_string(),
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
                "/rest/v1/monthly_invoices",
                Some(auth_token),
                Some(invoice_data),
                Some(headers),
            )
            .await
            .map_err(|e| {
                error!("Failed to create monthly invoice: {}", e);
                BillingError::Database(e.to_string())
            })?;

        let invoice = result
            .into_iter()
            .next()
            .map(parse_invoice)
            .transpose()?
            .ok_or_else(|| BillingError::Database("Insert returned no row".to_string()))?;

        info!(
            "Monthly invoice {} created for patient {} (due {})",
            invoice.id, patient_id, invoice.due_date
        );
        Ok(EnsureInvoiceOutcome::Created { invoice })
    }

    async fn get_patient(
        &self,
        psychologist_id: Uuid,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Patient, BillingError> {
        let path = format!(
            "/rest/v1/patients?id=eq.{}&psychologist_id=eq.{}&deleted_at=is.null",
            patient_id, psychologist_id
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| {
                error!("Failed to fetch patient for billing: {}", e);
                BillingError::Database(e.to_string())
            })?;

        result
            .into_iter()
            .next()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|e| BillingError::Database(format!("Malformed patient row: {}", e)))
            })
            .transpose()?
            .ok_or(BillingError::NotFound)
    }
}

pub(crate) fn parse_invoice(row: Value) -> Result<MonthlyInvoice, BillingError> {
    serde_json::from_value(row)
        .map_err(|e| BillingError::Database(format!("Malformed invoice row: {}", e)))
}
