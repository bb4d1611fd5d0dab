// libs/billing-cell/src/services/finance.rs
use std::collections::HashMap;

use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use patient_cell::models::Patient;
use schedule_cell::models::{Appointment, PaymentStatus};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::error::FieldErrors;
use shared_utils::clock::{Clock, SystemClock};

use crate::models::{
    BillingError, CreateFinancialRecordRequest, ExtractEntry, ExtractQuery, ExtractSource,
    FinancialExtract, FinancialRecord, InvoiceStatus, MonthlyInvoice, RecordKind, RevenueSummary,
    SettledStatus,
};
use crate::services::billing::{is_billable_as_session, parse_invoice};

pub struct FinanceService {
    supabase: Arc<SupabaseClient>,
    clock: Arc<dyn Clock>,
}

impl FinanceService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            clock,
        }
    }

    pub async fn create_record(
        &self,
        psychologist_id: Uuid,
        request: CreateFinancialRecordRequest,
        auth_token: &str,
    ) -> Result<FinancialRecord, BillingError> {
        let mut errors = FieldErrors::new();
        if request.description.trim().is_empty() {
            errors.push("description", "Description is required");
        }
        if request.amount < 0.0 {
            errors.push("amount", "Amount cannot be negative");
        }
        errors.into_result().map_err(BillingError::Validation)?;

        let now = self.clock.now();
        let record_data = json!({
            "psychologist_id": psychologist_id,
            "patient_id": request.patient_id,
            "kind": request.kind.to_string(),
            "description": request.description,
            "amount": request.amount,
            "record_date": request.record_date.format("%Y-%m-%d").to_string(),
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
                "/rest/v1/financial_records",
                Some(auth_token),
                Some(record_data),
                Some(headers),
            )
            .await
            .map_err(|e| {
                error!("Failed to create financial record: {}", e);
                BillingError::Database(e.to_string())
            })?;

        let record = parse_record_rows(result)?
            .into_iter()
            .next()
            .ok_or_else(|| BillingError::Database("Insert returned no row".to_string()))?;

        info!("Financial record {} created", record.id);
        Ok(record)
    }

    pub async fn list_records(
        &self,
        psychologist_id: Uuid,
        query: &ExtractQuery,
        auth_token: &str,
    ) -> Result<Vec<FinancialRecord>, BillingError> {
        let path = format!(
            "/rest/v1/financial_records?psychologist_id=eq.{}&deleted_at=is.null&record_date=gte.{}&record_date=lte.{}&order=record_date.asc",
            psychologist_id,
            query.from.format("%Y-%m-%d"),
            query.to.format("%Y-%m-%d")
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| {
                error!("Failed to list financial records: {}", e);
                BillingError::Database(e.to_string())
            })?;

        parse_record_rows(result)
    }

    /// The unified financial extract: session-billable appointments, monthly
    /// invoices and manual ledger entries over one date range, with revenue
    /// bucketed by billing track.
    pub async fn extract(
        &self,
        psychologist_id: Uuid,
        query: &ExtractQuery,
        auth_token: &str,
    ) -> Result<FinancialExtract, BillingError> {
        debug!(
            "Building financial extract for {} ({} to {})",
            psychologist_id, query.from, query.to
        );

        // Patients are fetched without the tombstone filter: past revenue
        // of a since-deleted patient still needs billing-model attribution.
        let patients = self.fetch_patients(psychologist_id, auth_token).await?;
        let appointments = self.fetch_appointments(psychologist_id, query, auth_token).await?;
        let invoices = self.fetch_invoices(psychologist_id, query, auth_token).await?;
        let records = self.list_records(psychologist_id, query, auth_token).await?;

        Ok(build_extract(&patients, appointments, invoices, records))
    }

    /// Mark an invoice paid or cancelled from the financial view.
    pub async fn settle_invoice(
        &self,
        psychologist_id: Uuid,
        invoice_id: Uuid,
        status: SettledStatus,
        auth_token: &str,
    ) -> Result<MonthlyInvoice, BillingError> {
        let path = format!(
            "/rest/v1/monthly_invoices?id=eq.{}&psychologist_id=eq.{}&deleted_at=is.null",
            invoice_id, psychologist_id
        );

        let update = json!({
            "status": status.to_string(),
            "updated_at": self.clock.now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(update), Some(headers))
            .await
            .map_err(|e| {
                error!("Failed to settle invoice: {}", e);
                BillingError::Database(e.to_string())
            })?;

        result
            .into_iter()
            .next()
            .map(parse_invoice)
            .transpose()?
            .ok_or(BillingError::NotFound)
    }

    /// Mark an appointment's session payment paid or cancelled.
    pub async fn settle_appointment_payment(
        &self,
        psychologist_id: Uuid,
        appointment_id: Uuid,
        status: SettledStatus,
        auth_token: &str,
    ) -> Result<Appointment, BillingError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&psychologist_id=eq.{}&deleted_at=is.null",
            appointment_id, psychologist_id
        );

        let update = json!({
            "payment_status": status.to_string(),
            "updated_at": self.clock.now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(update), Some(headers))
            .await
            .map_err(|e| {
                error!("Failed to settle appointment payment: {}", e);
                BillingError::Database(e.to_string())
            })?;

        result
            .into_iter()
            .next()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| {
                    BillingError::Database(format!("Malformed appointment row: {}", e))
                })
            })
            .transpose()?
            .ok_or(BillingError::NotFound)
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn fetch_patients(
        &self,
        psychologist_id: Uuid,
        auth_token: &str,
    ) -> Result<HashMap<Uuid, Patient>, BillingError> {
        let path = format!("/rest/v1/patients?psychologist_id=eq.{}", psychologist_id);

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| {
                error!("Failed to fetch patients for extract: {}", e);
                BillingError::Database(e.to_string())
            })?;

        result
            .into_iter()
            .map(|row| {
                serde_json::from_value::<Patient>(row)
                    .map(|p| (p.id, p))
                    .map_err(|e| BillingError::Database(format!("Malformed patient row: {}", e)))
            })
            .collect()
    }

    async fn fetch_appointments(
        &self,
        psychologist_id: Uuid,
        query: &ExtractQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, BillingError> {
        let from = query.from.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let to = (query.to + chrono::Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();

        let path = format!(
            "/rest/v1/appointments?psychologist_id=eq.{}&deleted_at=is.null&payment_status=neq.cancelled&start_time=gte.{}&start_time=lt.{}&order=start_time.asc",
            psychologist_id,
            urlencoding::encode(&from.to_rfc3339()),
            urlencoding::encode(&to.to_rfc3339())
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| {
                error!("Failed to fetch appointments for extract: {}", e);
                BillingError::Database(e.to_string())
            })?;

        result
            .into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| {
                    BillingError::Database(format!("Malformed appointment row: {}", e))
                })
            })
            .collect()
    }

    async fn fetch_invoices(
        &self,
        psychologist_id: Uuid,
        query: &ExtractQuery,
        auth_token: &str,
    ) -> Result<Vec<MonthlyInvoice>, BillingError> {
        let path = format!(
            "/rest/v1/monthly_invoices?psychologist_id=eq.{}&deleted_at=is.null&status=neq.cancelled&due_date=gte.{}&due_date=lte.{}&order=due_date.asc",
            psychologist_id,
            query.from.format("%Y-%m-%d"),
            query.to.format("%Y-%m-%d")
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| {
                error!("Failed to fetch invoices for extract: {}", e);
                BillingError::Database(e.to_string())
            })?;

        result.into_iter().map(parse_invoice).collect()
    }
}

fn parse_record_rows(rows: Vec<Value>) -> Result<Vec<FinancialRecord>, BillingError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row)
                .map_err(|e| BillingError::Database(format!("Malformed record row: {}", e)))
        })
        .collect()
}

/// Pure assembly of the extract: attribution runs through the billing
/// resolver, so a monthly-plan appointment only counts as session revenue
/// when it carries the override flag.
pub(crate) fn build_extract(
    patients: &HashMap<Uuid, Patient>,
    appointments: Vec<Appointment>,
    invoices: Vec<MonthlyInvoice>,
    records: Vec<FinancialRecord>,
) -> FinancialExtract {
    let mut entries = Vec::new();
    let mut summary = RevenueSummary::default();

    for appointment in appointments {
        if appointment.payment_status == PaymentStatus::Cancelled {
            continue;
        }

        let billable = patients
            .get(&appointment.patient_id)
            .map(|p| is_billable_as_session(p, &appointment))
            // Unknown patient: absence of a billing model means per-session.
            .unwrap_or(true);

        if !billable {
            continue;
        }

        summary.sessions_total += appointment.session_price;

        let patient_name = patients
            .get(&appointment.patient_id)
            .map(|p| p.full_name.clone())
            .unwrap_or_else(|| "unknown patient".to_string());

        entries.push(ExtractEntry {
            date: appointment.start_time.date_naive(),
            description: format!("Session with {}", patient_name),
            amount: appointment.session_price,
            source: ExtractSource::Session,
            patient_id: Some(appointment.patient_id),
        });
    }

    for invoice in invoices {
        if invoice.status == InvoiceStatus::Cancelled {
            continue;
        }

        summary.monthly_plans_total += invoice.amount;

        entries.push(ExtractEntry {
            date: invoice.due_date,
            description: format!("Monthly plan invoice ({})", invoice.reference_month.format("%Y-%m")),
            amount: invoice.amount,
            source: ExtractSource::MonthlyInvoice,
            patient_id: Some(invoice.patient_id),
        });
    }

    for record in records {
        let signed_amount = match record.kind {
            RecordKind::Income => {
                summary.manual_income_total += record.amount;
                record.amount
            }
            RecordKind::Expense => {
                summary.manual_expense_total += record.amount;
                -record.amount
            }
        };

        entries.push(ExtractEntry {
            date: record.record_date,
            description: record.description,
            amount: signed_amount,
            source: ExtractSource::Manual,
            patient_id: record.patient_id,
        });
    }

    entries.sort_by_key(|entry| entry.date);

    FinancialExtract { entries, summary }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use patient_cell::models::BillingModel;
    use schedule_cell::models::{AppointmentStatus, Modality};

    fn plan_patient(id: Uuid) -> Patient {
        Patient {
            id,
            psychologist_id: Uuid::new_v4(),
            full_name: "Ana Souza".to_string(),
            email: None,
            phone: None,
            billing_model: Some(BillingModel::MonthlyPlan),
            monthly_price: Some(600.0),
            payment_due_day: Some(5),
            plan_start_date: NaiveDate::from_ymd_opt(2025, 1, 1),
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn appointment(patient_id: Uuid, bill_as_session: bool) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            psychologist_id: Uuid::new_v4(),
            patient_id,
            start_time: Utc.with_ymd_and_hms(2025, 3, 12, 14, 0, 0).unwrap(),
            duration_minutes: 50,
            modality: Modality::Presencial,
            status: AppointmentStatus::Completed,
            meet_link: None,
            telepsy_consent: false,
            session_price: 180.0,
            bill_as_session,
            payment_status: PaymentStatus::Pending,
            notes: None,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn plan_appointment_without_override_stays_out_of_sessions_bucket() {
        let patient = plan_patient(Uuid::new_v4());
        let patients: HashMap<Uuid, Patient> = [(patient.id, patient.clone())].into();

        let extract = build_extract(
            &patients,
            vec![appointment(patient.id, false)],
            vec![],
            vec![],
        );

        assert_eq!(extract.summary.sessions_total, 0.0);
        assert!(extract.entries.is_empty());
    }

    #[test]
    fn bill_as_session_override_flips_the_bucket() {
        let patient = plan_patient(Uuid::new_v4());
        let patients: HashMap<Uuid, Patient> = [(patient.id, patient.clone())].into();

        let extract = build_extract(
            &patients,
            vec![appointment(patient.id, true)],
            vec![],
            vec![],
        );

        assert_eq!(extract.summary.sessions_total, 180.0);
        assert_eq!(extract.entries.len(), 1);
        assert_eq!(extract.entries[0].source, ExtractSource::Session);
    }

    #[test]
    fn unknown_billing_model_defaults_to_per_session() {
        let patients = HashMap::new();

        let extract = build_extract(
            &patients,
            vec![appointment(Uuid::new_v4(), false)],
            vec![],
            vec![],
        );

        assert_eq!(extract.summary.sessions_total, 180.0);
    }

    #[test]
    fn expenses_are_signed_negative_in_the_extract() {
        let record = FinancialRecord {
            id: Uuid::new_v4(),
            psychologist_id: Uuid::new_v4(),
            patient_id: None,
            kind: RecordKind::Expense,
            description: "Room rent".to_string(),
            amount: 900.0,
            record_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let extract = build_extract(&HashMap::new(), vec![], vec![], vec![record]);

        assert_eq!(extract.entries[0].amount, -900.0);
        assert_eq!(extract.summary.manual_expense_total, 900.0);
    }

    #[test]
    fn entries_are_ordered_by_date() {
        let patient = plan_patient(Uuid::new_v4());
        let patients: HashMap<Uuid, Patient> = [(patient.id, patient.clone())].into();

        let invoice = MonthlyInvoice {
            id: Uuid::new_v4(),
            psychologist_id: Uuid::new_v4(),
            patient_id: patient.id,
            reference_month: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            amount: 600.0,
            due_date: NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(),
            status: InvoiceStatus::Pending,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let extract = build_extract(
            &patients,
            vec![appointment(patient.id, true)],
            vec![invoice],
            vec![],
        );

        assert_eq!(extract.entries.len(), 2);
        assert!(extract.entries[0].date <= extract.entries[1].date);
        assert_eq!(extract.entries[0].source, ExtractSource::MonthlyInvoice);
    }
}
