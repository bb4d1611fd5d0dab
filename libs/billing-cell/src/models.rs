// libs/billing-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use shared_models::error::{AppError, FieldErrors};

/// Charged when a monthly-plan patient has no configured price.
pub const DEFAULT_MONTHLY_PRICE: f64 = 250.0;

// ==============================================================================
// MONTHLY INVOICE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyInvoice {
    pub id: Uuid,
    pub psychologist_id: Uuid,
    pub patient_id: Uuid,
    /// Always the first day of the month it covers.
    pub reference_month: NaiveDate,
    pub amount: f64,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvoiceStatus::Pending => write!(f, "pending"),
            InvoiceStatus::Paid => write!(f, "paid"),
            InvoiceStatus::Overdue => write!(f, "overdue"),
            InvoiceStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsureInvoiceRequest {
    pub patient_id: Uuid,
    pub reference_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnsureInvoiceOutcome {
    Created { invoice: MonthlyInvoice },
    AlreadyExists { invoice: MonthlyInvoice },
    NotApplicable,
}

// ==============================================================================
// OVERDUE SWEEP MODELS
// ==============================================================================

/// Rows promoted from pending to overdue by one sweep run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverdueSweepReport {
    pub appointments_marked: usize,
    pub invoices_marked: usize,
}

// ==============================================================================
// FINANCIAL RECORD / EXTRACT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialRecord {
    pub id: Uuid,
    pub psychologist_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub kind: RecordKind,
    pub description: String,
    pub amount: f64,
    pub record_date: NaiveDate,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Income,
    Expense,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Income => write!(f, "income"),
            RecordKind::Expense => write!(f, "expense"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFinancialRecordRequest {
    pub kind: RecordKind,
    pub description: String,
    pub amount: f64,
    pub record_date: NaiveDate,
    pub patient_id: Option<Uuid>,
}

/// Financial date ranges are parsed strictly: a malformed date here is a
/// rejection, not a fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractEntry {
    pub date: NaiveDate,
    pub description: String,
    /// Signed: expenses are negative.
    pub amount: f64,
    pub source: ExtractSource,
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractSource {
    Session,
    MonthlyInvoice,
    Manual,
}

/// Revenue bucketing for the financial view. An appointment lands in the
/// "sessions" bucket iff the billing resolver says it is billable as a
/// session; everything else of a monthly-plan patient shows up through the
/// invoice bucket instead.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct RevenueSummary {
    pub sessions_total: f64,
    pub monthly_plans_total: f64,
    pub manual_income_total: f64,
    pub manual_expense_total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinancialExtract {
    pub entries: Vec<ExtractEntry>,
    pub summary: RevenueSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlePaymentRequest {
    /// Only `paid` and `cancelled` are reachable from the financial view;
    /// `overdue` is owned by the sweep.
    pub status: SettledStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettledStatus {
    Paid,
    Cancelled,
}

impl fmt::Display for SettledStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettledStatus::Paid => write!(f, "paid"),
            SettledStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum BillingError {
    #[error("Record not found or access denied")]
    NotFound,

    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::NotFound => AppError::NotFound("Record not found or access denied".to_string()),
            BillingError::Validation(fields) => AppError::Validation(fields),
            BillingError::Database(msg) => AppError::Database(msg),
        }
    }
}
