// libs/patient-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use shared_models::error::{AppError, FieldErrors};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub psychologist_id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub billing_model: Option<BillingModel>,
    // Meaningful only under a monthly plan; ignored otherwise.
    pub monthly_price: Option<f64>,
    pub payment_due_day: Option<u32>,
    pub plan_start_date: Option<NaiveDate>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn is_on_monthly_plan(&self) -> bool {
        self.billing_model == Some(BillingModel::MonthlyPlan)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingModel {
    PerSession,
    MonthlyPlan,
}

impl fmt::Display for BillingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingModel::PerSession => write!(f, "per_session"),
            BillingModel::MonthlyPlan => write!(f, "monthly_plan"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePatientRequest {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub billing_model: Option<BillingModel>,
    pub monthly_price: Option<f64>,
    pub payment_due_day: Option<u32>,
    pub plan_start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePatientRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub billing_model: Option<BillingModel>,
    pub monthly_price: Option<f64>,
    pub payment_due_day: Option<u32>,
    pub plan_start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum PatientError {
    #[error("Patient not found or access denied")]
    NotFound,

    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<PatientError> for AppError {
    fn from(err: PatientError) -> Self {
        match err {
            PatientError::NotFound => AppError::NotFound("Patient not found or access denied".to_string()),
            PatientError::Validation(fields) => AppError::Validation(fields),
            PatientError::Database(msg) => AppError::Database(msg),
        }
    }
}
