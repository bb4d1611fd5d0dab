use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use notes_cell::models::{CreateNoteRequest, DECRYPT_PLACEHOLDER};
use notes_cell::services::crypto::NoteCrypto;
use notes_cell::services::notes::ClinicalNoteService;
use shared_utils::clock::FixedClock;
use shared_utils::test_utils::TestConfig;

const TOKEN: &str = "test-token";

fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
}

async fn service_against(server: &MockServer) -> ClinicalNoteService {
    let config = TestConfig::with_store_url(&server.uri()).to_app_config();
    ClinicalNoteService::with_clock(&config, Arc::new(FixedClock::new(fixed_now()))).unwrap()
}

fn note_row(tenant_id: Uuid, patient_id: Uuid, session_number: i32, ciphertext: &str) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "psychologist_id": tenant_id,
        "patient_id": patient_id,
        "session_number": session_number,
        "content_encrypted": ciphertext,
        "deleted_at": null,
        "created_at": fixed_now().to_rfc3339(),
        "updated_at": fixed_now().to_rfc3339()
    })
}

#[tokio::test]
async fn new_note_gets_the_next_session_number_and_encrypted_body() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    // One previous session on file.
    Mock::given(method("GET"))
        .and(path("/rest/v1/clinical_notes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            note_row(tenant_id, patient_id, 1, "opaque")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/clinical_notes"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            note_row(tenant_id, patient_id, 2, "opaque")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let service = service_against(&server).await;
    let plaintext = "Paciente relatou melhora no sono.";
    let note = service
        .create_note(
            tenant_id,
            patient_id,
            CreateNoteRequest {
                content: plaintext.to_string(),
            },
            TOKEN,
        )
        .await
        .unwrap();

    assert_eq!(note.session_number, 2);
    assert_eq!(note.content, plaintext);

    // What went over the wire was ciphertext that round-trips under the
    // configured key, never the plaintext.
    let requests = server.received_requests().await.unwrap();
    let insert = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .expect("insert request");
    let body: Value = serde_json::from_slice(&insert.body).unwrap();
    assert_eq!(body["session_number"], 2);

    let stored = body["content_encrypted"].as_str().unwrap();
    assert_ne!(stored, plaintext);

    let crypto = NoteCrypto::new(&STANDARD.encode([0u8; 32])).unwrap();
    assert_eq!(crypto.decrypt(stored).unwrap(), plaintext);
}

#[tokio::test]
async fn first_note_for_a_patient_is_session_one() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/clinical_notes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/clinical_notes"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            note_row(tenant_id, patient_id, 1, "opaque")
        ])))
        .mount(&server)
        .await;

    let service = service_against(&server).await;
    let note = service
        .create_note(
            tenant_id,
            patient_id,
            CreateNoteRequest {
                content: "Primeira sessao.".to_string(),
            },
            TOKEN,
        )
        .await
        .unwrap();

    assert_eq!(note.session_number, 1);
}

#[tokio::test]
async fn unreadable_ciphertext_renders_the_placeholder() {
    let server = MockServer::start().await;
    let tenant_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    let crypto = NoteCrypto::new(&STANDARD.encode([0u8; 32])).unwrap();
    let good = crypto.encrypt("conteudo legivel").unwrap();

    Mock::given(method("GET"))
        .and(path("/rest/v1/clinical_notes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            note_row(tenant_id, patient_id, 1, &good),
            note_row(tenant_id, patient_id, 2, "corrupted-ciphertext"),
        ])))
        .mount(&server)
        .await;

    let service = service_against(&server).await;
    let notes = service.list_notes(tenant_id, patient_id, TOKEN).await.unwrap();

    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0].content, "conteudo legivel");
    assert_eq!(notes[1].content, DECRYPT_PLACEHOLDER);
}
