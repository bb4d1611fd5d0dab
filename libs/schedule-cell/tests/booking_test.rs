use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, TimeZone, Utc};
use regex::Regex;
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use schedule_cell::models::{
    CreateAppointmentRequest, Modality, RescheduleAppointmentRequest, ScheduleError,
};
use schedule_cell::services::booking::AppointmentBookingService;
use shared_utils::clock::FixedClock;
use shared_utils::test_utils::{MockStoreRows, TestConfig};

const TOKEN: &str = "test-token";

fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
}

async fn service_against(server: &MockServer) -> AppointmentBookingService {
    let config = TestConfig::with_store_url(&server.uri()).to_app_config();
    AppointmentBookingService::with_clock(&config, Arc::new(FixedClock::new(fixed_now())))
}

fn create_request(modality: Modality) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        patient_id: Uuid::new_v4(),
        start_time: fixed_now() + Duration::days(2),
        duration_minutes: 50,
        modality,
        notes: None,
        telepsy_consent: false,
        session_price: 180.0,
        bill_as_session: false,
    }
}

async fn mock_no_overlap(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/appointment_overlap_exists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(false)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn booking_a_free_slot_succeeds_with_pending_payment() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();

    mock_no_overlap(&server).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreRows::appointment(
                Uuid::new_v4(),
                tenant_id,
                Uuid::new_v4(),
                fixed_now() + Duration::days(2),
                50,
            )
        ])))
        .mount(&server)
        .await;

    let service = service_against(&server).await;
    let appointment = service
        .create_appointment(tenant_id, create_request(Modality::Presencial), TOKEN)
        .await
        .unwrap();

    assert_eq!(appointment.status.to_string(), "scheduled");
    assert_eq!(appointment.payment_status.to_string(), "pending");
    assert_eq!(appointment.meet_link, None);

    // The inserted row itself carried the initial statuses and no link.
    let requests = server.received_requests().await.unwrap();
    let insert = requests
        .iter()
        .find(|r| r.method.as_str() == "POST" && r.url.path() == "/rest/v1/appointments")
        .expect("insert request");
    let body: Value = serde_json::from_slice(&insert.body).unwrap();
    assert_eq!(body["status"], "scheduled");
    assert_eq!(body["payment_status"], "pending");
    assert_eq!(body["meet_link"], Value::Null);
}

#[tokio::test]
async fn overlapping_booking_is_rejected_with_zero_writes() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/appointment_overlap_exists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
        .mount(&server)
        .await;

    // A conflicting booking must never reach the insert path.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let service = service_against(&server).await;
    let result = service
        .create_appointment(tenant_id, create_request(Modality::Presencial), TOKEN)
        .await;

    assert_matches!(result, Err(ScheduleError::SlotTaken));
}

#[tokio::test]
async fn online_booking_generates_a_meet_style_link() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();

    mock_no_overlap(&server).await;

    let mut row = MockStoreRows::appointment(
        Uuid::new_v4(),
        tenant_id,
        Uuid::new_v4(),
        fixed_now() + Duration::days(2),
        50,
    );
    row["modality"] = json!("online");
    row["meet_link"] = json!("https://meet.google.com/abc-defg-hij");

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([row])))
        .mount(&server)
        .await;

    let service = service_against(&server).await;
    service
        .create_appointment(tenant_id, create_request(Modality::Online), TOKEN)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let insert = requests
        .iter()
        .find(|r| r.method.as_str() == "POST" && r.url.path() == "/rest/v1/appointments")
        .expect("insert request");
    let body: Value = serde_json::from_slice(&insert.body).unwrap();

    let link_shape = Regex::new(r"^https://meet\.google\.com/[a-z]{3}-[a-z]{4}-[a-z]{3}$").unwrap();
    assert!(link_shape.is_match(body["meet_link"].as_str().unwrap()));
}

#[tokio::test]
async fn rescheduling_onto_its_own_slot_excludes_itself() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();
    let start = fixed_now() + Duration::days(2);

    let existing = MockStoreRows::appointment(appointment_id, tenant_id, Uuid::new_v4(), start, 50);

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([existing.clone()])))
        .mount(&server)
        .await;

    // The overlap predicate must receive the appointment's own id as the
    // exclusion parameter; the no-op move is then conflict-free.
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/appointment_overlap_exists"))
        .and(body_partial_json(json!({ "p_exclude_id": appointment_id })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(false)))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([existing])))
        .mount(&server)
        .await;

    let service = service_against(&server).await;
    let request = RescheduleAppointmentRequest {
        new_start_time: start,
        new_duration_minutes: 50,
        new_modality: Modality::Presencial,
        notes: None,
        telepsy_consent: false,
    };

    let result = service
        .reschedule_appointment(tenant_id, appointment_id, request, TOKEN)
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn switching_to_presencial_clears_the_link() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();
    let start = fixed_now() + Duration::days(2);

    let mut existing =
        MockStoreRows::appointment(appointment_id, tenant_id, Uuid::new_v4(), start, 50);
    existing["modality"] = json!("online");
    existing["meet_link"] = json!("https://meet.google.com/abc-defg-hij");

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([existing.clone()])))
        .mount(&server)
        .await;

    mock_no_overlap(&server).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([existing])))
        .mount(&server)
        .await;

    let service = service_against(&server).await;
    let request = RescheduleAppointmentRequest {
        new_start_time: start,
        new_duration_minutes: 50,
        new_modality: Modality::Presencial,
        notes: None,
        telepsy_consent: false,
    };

    service
        .reschedule_appointment(tenant_id, appointment_id, request, TOKEN)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let update = requests
        .iter()
        .find(|r| r.method.as_str() == "PATCH")
        .expect("update request");
    let body: Value = serde_json::from_slice(&update.body).unwrap();
    assert_eq!(body["meet_link"], Value::Null);
}

#[tokio::test]
async fn past_start_time_never_reaches_the_store() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();

    let service = service_against(&server).await;
    let mut request = create_request(Modality::Presencial);
    request.start_time = fixed_now() - Duration::hours(2);

    let result = service.create_appointment(tenant_id, request, TOKEN).await;

    assert_matches!(result, Err(ScheduleError::Validation(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn conflict_check_failure_falls_open_and_booking_proceeds() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();

    // Store error on the overlap predicate: the checker reports "no
    // conflict" (logged as an anomaly) instead of blocking the booking.
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/appointment_overlap_exists"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreRows::appointment(
                Uuid::new_v4(),
                tenant_id,
                Uuid::new_v4(),
                fixed_now() + Duration::days(2),
                50,
            )
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let service = service_against(&server).await;
    let result = service
        .create_appointment(tenant_id, create_request(Modality::Presencial), TOKEN)
        .await;

    assert!(result.is_ok());
}
