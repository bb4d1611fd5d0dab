use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::Session;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub note_encryption_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            // 32 zero bytes, base64
            note_encryption_key: general_purpose::STANDARD.encode([0u8; 32]),
        }
    }
}

impl TestConfig {
    pub fn with_store_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            note_encryption_key: self.note_encryption_key.clone(),
            request_timeout_secs: 5,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestTenant {
    pub id: Uuid,
    pub email: String,
}

impl Default for TestTenant {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            email: "psicologa@example.com".to_string(),
        }
    }
}

impl TestTenant {
    pub fn to_session(&self) -> Session {
        Session {
            tenant_id: self.id,
            email: Some(self.email.clone()),
            role: Some("psychologist".to_string()),
            issued_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(tenant: &TestTenant, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": tenant.id.to_string(),
            "email": tenant.email,
            "role": "psychologist",
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }
}

/// Canned PostgREST row payloads for wiremock-backed tests.
pub struct MockStoreRows;

impl MockStoreRows {
    pub fn appointment(
        id: Uuid,
        tenant_id: Uuid,
        patient_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i32,
    ) -> Value {
        json!({
            "id": id,
            "psychologist_id": tenant_id,
            "patient_id": patient_id,
            "start_time": start_time.to_rfc3339(),
            "duration_minutes": duration_minutes,
            "modality": "presencial",
            "status": "scheduled",
            "meet_link": null,
            "telepsy_consent": false,
            "session_price": 180.0,
            "bill_as_session": false,
            "payment_status": "pending",
            "notes": null,
            "deleted_at": null,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        })
    }

    pub fn patient(id: Uuid, tenant_id: Uuid, name: &str, billing_model: &str) -> Value {
        json!({
            "id": id,
            "psychologist_id": tenant_id,
            "full_name": name,
            "email": "patient@example.com",
            "phone": "+55 11 90000-0000",
            "billing_model": billing_model,
            "monthly_price": if billing_model == "monthly_plan" { json!(600.0) } else { Value::Null },
            "payment_due_day": if billing_model == "monthly_plan" { json!(5) } else { Value::Null },
            "plan_start_date": if billing_model == "monthly_plan" { json!("2025-01-01") } else { Value::Null },
            "deleted_at": null,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        })
    }

    pub fn monthly_invoice(
        id: Uuid,
        tenant_id: Uuid,
        patient_id: Uuid,
        reference_month: &str,
        due_date: &str,
    ) -> Value {
        json!({
            "id": id,
            "psychologist_id": tenant_id,
            "patient_id": patient_id,
            "reference_month": reference_month,
            "amount": 600.0,
            "due_date": due_date,
            "status": "pending",
            "deleted_at": null,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        })
    }
}
