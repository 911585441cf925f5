//! OpenAPI documentation for the readmission-risk API.
//!
//! The document is served as JSON at `/openapi.json` and rendered with Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{api, errors::ErrorBody, inference};

/// Bearer session token issued by `POST /auth/login`.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Session token authentication. Log in with `POST /auth/login` and send the token in the \
                            `Authorization` header:\n\n```\nAuthorization: Bearer YOUR_TOKEN\n```",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Readmission Risk API",
        description = "Authenticated, rate-limited readmission-risk scoring over stored patient records."
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::health::health,
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::auth::me,
        api::handlers::auth::change_password,
        api::handlers::users::list_users,
        api::handlers::users::delete_user,
        api::handlers::patients::create_patient,
        api::handlers::patients::list_patients,
        api::handlers::patients::get_patient,
        api::handlers::patients::update_patient,
        api::handlers::patients::delete_patient,
        api::handlers::patients::get_history,
        api::handlers::predictions::predict,
        api::handlers::predictions::get_prediction,
        api::handlers::model::get_model,
    ),
    components(
        schemas(
            ErrorBody,
            api::handlers::health::HealthResponse,
            api::models::auth::RegisterRequest,
            api::models::auth::LoginRequest,
            api::models::auth::TokenResponse,
            api::models::auth::ChangePasswordRequest,
            api::models::users::Role,
            api::models::users::CurrentUser,
            api::models::users::UserResponse,
            api::models::patients::Vitals,
            api::models::patients::PatientCreate,
            api::models::patients::PatientUpdate,
            api::models::patients::PatientResponse,
            api::models::predictions::PredictRequest,
            api::models::predictions::PredictionResponse,
            inference::FeatureInput,
            inference::FeatureVector,
            inference::RiskBand,
            inference::ContributingFactor,
            inference::Recommendations,
            inference::ModelInfo,
        )
    ),
    tags(
        (name = "health", description = "Liveness"),
        (name = "authentication", description = "Registration, login and session tokens"),
        (name = "users", description = "Account administration"),
        (name = "patients", description = "Patient records and prediction history"),
        (name = "predictions", description = "Readmission-risk scoring"),
        (name = "model", description = "Loaded model description"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_app, create_test_config};

    #[test]
    fn test_document_lists_every_route() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        for path in [
            "/health",
            "/auth/register",
            "/auth/login",
            "/auth/me",
            "/auth/change-password",
            "/users",
            "/users/{id}",
            "/patients",
            "/patients/{id}",
            "/patients/{id}/history",
            "/predict",
            "/predictions/{id}",
            "/model",
        ] {
            assert!(paths.contains_key(path), "missing {path}");
        }
        assert!(doc["components"]["securitySchemes"]["BearerAuth"].is_object());
    }

    #[tokio::test]
    async fn test_openapi_json_and_docs_are_served() {
        let server = create_test_app(create_test_config()).await;

        let response = server.get("/openapi.json").await;
        response.assert_status_ok();
        assert!(response.text().contains("Readmission Risk API"));

        server.get("/docs").await.assert_status_ok();
    }
}
