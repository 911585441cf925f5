//! Test utilities shared by unit and HTTP tests.

use std::path::PathBuf;
use std::sync::Arc;

use axum_test::TestServer;
use serde_json::json;
use uuid::Uuid;

use crate::{
    AppState, Application,
    api::models::{auth::TokenResponse, users::{CurrentUser, Role}},
    config::{AuthConfig, Config, ModelConfig, PasswordConfig, RateLimitConfig},
    db::handlers::InMemoryStore,
    inference::{FeatureVector, InferenceEngine, RiskAssessment},
};

pub const TEST_ADMIN_IDENTITY: &str = "admin";
pub const TEST_ADMIN_PASSWORD: &str = "Adm1nistrator!";
pub const TEST_PASSWORD: &str = "Sup3rSecret!";

/// The model artifact shipped with the crate.
pub fn bundled_model_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("models/readmission_model.json")
}

pub fn create_test_config() -> Config {
    Config {
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        auth: AuthConfig {
            // Cheap hashing keeps HTTP tests fast
            password: PasswordConfig {
                argon2_memory_kib: 1024,
                argon2_iterations: 1,
                ..Default::default()
            },
            ..Default::default()
        },
        model: ModelConfig {
            path: bundled_model_path(),
            version: "1.0.0".to_string(),
        },
        rate_limit: RateLimitConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn create_test_engine() -> InferenceEngine {
    InferenceEngine::load(&bundled_model_path(), "1.0.0").expect("bundled model should load")
}

pub async fn create_test_app_state() -> AppState {
    AppState::builder()
        .config(create_test_config())
        .engine(create_test_engine())
        .store(Arc::new(InMemoryStore::new()))
        .build()
}

pub fn create_test_user(role: Role) -> CurrentUser {
    let id = Uuid::new_v4();
    CurrentUser {
        id,
        identity: format!("user-{}", &id.simple().to_string()[..8]),
        role,
    }
}

/// Full application over the in-memory store, with the admin account seeded.
pub async fn create_test_app(mut config: Config) -> TestServer {
    config.admin_identity = Some(TEST_ADMIN_IDENTITY.to_string());
    config.admin_password = Some(TEST_ADMIN_PASSWORD.to_string());
    Application::new(config)
        .await
        .expect("Failed to create application")
        .into_test_server()
}

pub async fn login(server: &TestServer, identity: &str, password: &str) -> String {
    let response = server
        .post("/auth/login")
        .json(&json!({ "identity": identity, "password": password }))
        .await;
    response.assert_status_ok();
    response.json::<TokenResponse>().token
}

/// Register `identity` with `role` and return a session token for it.
pub async fn register_and_login(server: &TestServer, identity: &str, role: Role) -> String {
    server
        .post("/auth/register")
        .json(&json!({ "identity": identity, "password": TEST_PASSWORD, "role": role }))
        .await
        .assert_status(axum::http::StatusCode::CREATED);
    login(server, identity, TEST_PASSWORD).await
}

pub async fn admin_token(server: &TestServer) -> String {
    login(server, TEST_ADMIN_IDENTITY, TEST_ADMIN_PASSWORD).await
}

pub fn sample_features() -> FeatureVector {
    FeatureVector {
        age: 72,
        gender: "Female".to_string(),
        primary_diagnosis: "Heart Failure".to_string(),
        num_procedures: 2,
        days_in_hospital: 6,
        comorbidity_score: 3.5,
        discharge_to: "Home".to_string(),
        prior_admissions: 1,
    }
}

/// Request body form of [`sample_features`].
pub fn sample_features_json() -> serde_json::Value {
    serde_json::to_value(sample_features()).expect("features serialize")
}

pub fn sample_assessment() -> RiskAssessment {
    create_test_engine()
        .predict(&sample_features())
        .expect("sample features should score")
}
