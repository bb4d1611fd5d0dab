// libs/billing-cell/src/services/overdue.rs
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::clock::{Clock, SystemClock};

use crate::models::OverdueSweepReport;

pub struct OverdueSweepService {
    supabase: Arc<SupabaseClient>,
    clock: Arc<dyn Clock>,
}

impl OverdueSweepService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            clock,
        }
    }

    /// Promote elapsed pending payments to overdue for one tenant.
    ///
    /// Two independent bulk updates at calendar-day granularity: session
    /// payments whose appointment day has passed, and invoices whose due
    /// date has passed. A failure in one bucket is logged and does not
    /// block the other. Re-running against a settled state matches zero
    /// rows, so the financial view can invoke this on every load.
    pub async fn update_overdue_payments(
        &self,
        psychologist_id: Uuid,
        auth_token: &str,
    ) -> OverdueSweepReport {
        let today = self.clock.today();
        let day_start = today.and_hms_opt(0, 0, 0).unwrap().and_utc();
        debug!("Running overdue sweep for psychologist {} (today: {})", psychologist_id, today);

        let appointments_path = format!(
            "/rest/v1/appointments?psychologist_id=eq.{}&payment_status=eq.pending&start_time=lt.{}&deleted_at=is.null",
            psychologist_id,
            urlencoding::encode(&day_start.to_rfc3339())
        );
        let appointments_marked = self
            .bulk_mark_overdue(
                &appointments_path,
                json!({
                    "payment_status": "overdue",
                    "updated_at": self.clock.now().to_rfc3339()
                }),
                auth_token,
                "session payments",
            )
            .await;

        let invoices_path = format!(
            "/rest/v1/monthly_invoices?psychologist_id=eq.{}&status=eq.pending&due_date=lt.{}&deleted_at=is.null",
            psychologist_id,
            today.format("%Y-%m-%d")
        );
        let invoices_marked = self
            .bulk_mark_overdue(
                &invoices_path,
                json!({
                    "status": "overdue",
                    "updated_at": self.clock.now().to_rfc3339()
                }),
                auth_token,
                "monthly invoices",
            )
            .await;

        let report = OverdueSweepReport {
            appointments_marked,
            invoices_marked,
        };

        info!(
            "Overdue sweep for {}: {} session payments, {} invoices",
            psychologist_id, report.appointments_marked, report.invoices_marked
        );
        report
    }

    async fn bulk_mark_overdue(
        &self,
        path: &str,
        body: Value,
        auth_token: &str,
        bucket: &str,
    ) -> usize {
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
            Ok(rows) => rows.len(),
            Err(e) => {
                error!("Overdue sweep failed for {}: {}", bucket, e);
                0
            }
        }
    }
}
