use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use billing_cell::models::{EnsureInvoiceOutcome, OverdueSweepReport};
use billing_cell::services::billing::BillingService;
use billing_cell::services::overdue::OverdueSweepService;
use shared_utils::clock::FixedClock;
use shared_utils::test_utils::{MockStoreRows, TestConfig};

const TOKEN: &str = "test-token";

// The 10th of March: past the plan's due day (the 5th).
fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
}

async fn billing_service(server: &MockServer) -> BillingService {
    let config = TestConfig::with_store_url(&server.uri()).to_app_config();
    BillingService::with_clock(&config, Arc::new(FixedClock::new(fixed_now())))
}

async fn mount_plan_patient(server: &MockServer, tenant_id: Uuid, patient_id: Uuid) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::patient(patient_id, tenant_id, "Ana Souza", "monthly_plan")
        ])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn first_invoice_of_the_month_is_created_with_rolled_due_date() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    mount_plan_patient(&server, tenant_id, patient_id).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/monthly_invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/monthly_invoices"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreRows::monthly_invoice(Uuid::new_v4(), tenant_id, patient_id, "2025-03-01", "2025-04-05")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let service = billing_service(&server).await;
    let outcome = service
        .ensure_monthly_invoice(
            tenant_id,
            patient_id,
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            TOKEN,
        )
        .await
        .unwrap();

    assert_matches!(outcome, EnsureInvoiceOutcome::Created { .. });

    // Due day 5 already elapsed on the 10th: the created invoice is due on
    // the 5th of April, normalized to the March reference month.
    let requests = server.received_requests().await.unwrap();
    let insert = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .expect("insert request");
    let body: Value = serde_json::from_slice(&insert.body).unwrap();
    assert_eq!(body["reference_month"], "2025-03-01");
    assert_eq!(body["due_date"], "2025-04-05");
    assert_eq!(body["status"], "pending");
    assert_eq!(body["amount"], 600.0);
}

#[tokio::test]
async fn second_call_reports_already_exists_without_inserting() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    mount_plan_patient(&server, tenant_id, patient_id).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/monthly_invoices"))
        .and(query_param("reference_month", "eq.2025-03-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::monthly_invoice(Uuid::new_v4(), tenant_id, patient_id, "2025-03-01", "2025-04-05")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/monthly_invoices"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let service = billing_service(&server).await;
    let outcome = service
        .ensure_monthly_invoice(
            tenant_id,
            patient_id,
            // Any date inside March maps to the same reference month.
            NaiveDate::from_ymd_opt(2025, 3, 25).unwrap(),
            TOKEN,
        )
        .await
        .unwrap();

    assert_matches!(outcome, EnsureInvoiceOutcome::AlreadyExists { .. });
}

#[tokio::test]
async fn per_session_patient_is_not_applicable() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::patient(patient_id, tenant_id, "Ana Souza", "per_session")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/monthly_invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let service = billing_service(&server).await;
    let outcome = service
        .ensure_monthly_invoice(
            tenant_id,
            patient_id,
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            TOKEN,
        )
        .await
        .unwrap();

    assert_matches!(outcome, EnsureInvoiceOutcome::NotApplicable);
}

async fn sweep_service(server: &MockServer) -> OverdueSweepService {
    let config = TestConfig::with_store_url(&server.uri()).to_app_config();
    OverdueSweepService::with_clock(&config, Arc::new(FixedClock::new(fixed_now())))
}

#[tokio::test]
async fn sweep_reports_counts_from_both_buckets() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("payment_status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{}, {}, {}])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/monthly_invoices"))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{}])))
        .mount(&server)
        .await;

    let service = sweep_service(&server).await;
    let report = service.update_overdue_payments(tenant_id, TOKEN).await;

    assert_eq!(
        report,
        OverdueSweepReport {
            appointments_marked: 3,
            invoices_marked: 1,
        }
    );

    // Appointment lateness is judged at day granularity: the cutoff is
    // today's midnight, not the current instant.
    let requests = server.received_requests().await.unwrap();
    let appointment_patch = requests
        .iter()
        .find(|r| r.url.path() == "/rest/v1/appointments")
        .unwrap();
    assert!(appointment_patch
        .url
        .query()
        .unwrap()
        .contains("start_time=lt.2025-03-10T00"));
}

#[tokio::test]
async fn settled_state_sweeps_zero_rows() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/monthly_invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let service = sweep_service(&server).await;

    let first = service.update_overdue_payments(tenant_id, TOKEN).await;
    let second = service.update_overdue_payments(tenant_id, TOKEN).await;

    assert_eq!(first, OverdueSweepReport::default());
    assert_eq!(second, OverdueSweepReport::default());
}

#[tokio::test]
async fn one_failed_bucket_does_not_block_the_other() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/monthly_invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{}, {}])))
        .expect(1)
        .mount(&server)
        .await;

    let service = sweep_service(&server).await;
    let report = service.update_overdue_payments(tenant_id, TOKEN).await;

    assert_eq!(report.appointments_marked, 0);
    assert_eq!(report.invoices_marked, 2);
}
