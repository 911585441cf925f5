use axum::{extract::State, http::StatusCode};
use tracing::info;
use uuid::Uuid;

use crate::{
    AppState,
    api::extract::Json,
    api::models::{
        auth::{ChangePasswordRequest, LoginRequest, RegisterRequest, RegisterResponse, TokenResponse},
        users::{CurrentUser, Role, UserResponse},
    },
    auth::{AuthError, password, session},
    db::models::users::UserCreateDBRequest,
    errors::{Error, Result},
    types::abbrev_uuid,
};

/// Hash on a blocking thread; Argon2 is deliberately slow.
async fn hash_blocking(state: &AppState, plain: String) -> Result<String> {
    let params = state.config.auth.password.argon2_params();
    tokio::task::spawn_blocking(move || password::hash_password(&plain, params))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })?
}

async fn verify_blocking(plain: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || password::verify_password(&plain, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })?
}

/// Register a new user account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    tag = "authentication",
    summary = "Register",
    responses(
        (status = 201, description = "User registered successfully", body = UserResponse),
        (status = 400, description = "Invalid identity or weak password"),
        (status = 403, description = "Registration disabled or admin role requested"),
        (status = 409, description = "Identity already taken"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(State(state): State<AppState>, Json(request): Json<RegisterRequest>) -> Result<RegisterResponse> {
    if !state.config.auth.allow_registration {
        return Err(Error::Forbidden {
            action: "register new accounts".to_string(),
        });
    }

    let role = request.role.unwrap_or(Role::Clinician);
    if role == Role::Admin {
        return Err(Error::Forbidden {
            action: "self-assign the admin role".to_string(),
        });
    }

    let identity = request.identity.trim().to_string();
    password::check_identity(&identity)?;
    password::check_policy(&request.password, &state.config.auth.password)?;

    let password_hash = hash_blocking(&state, request.password).await?;
    let user = state
        .store
        .create_user(&UserCreateDBRequest {
            id: Uuid::new_v4(),
            identity,
            password_hash,
            role,
        })
        .await?;

    info!(user_id = %abbrev_uuid(&user.id), role = role.as_str(), "Registered user");
    Ok(RegisterResponse(user.into()))
}

/// Login with identity and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    tag = "authentication",
    summary = "Login",
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 401, description = "Invalid credentials"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<Json<TokenResponse>> {
    // Unknown identity and wrong password are reported identically
    let Some(user) = state.store.get_user_by_identity(request.identity.trim()).await? else {
        return Err(AuthError::InvalidCredentials.into());
    };

    if !verify_blocking(request.password, user.password_hash.clone()).await? {
        return Err(AuthError::InvalidCredentials.into());
    }

    let issued = session::create_session_token(&CurrentUser::from(&user), &state.config)?;
    info!(user_id = %abbrev_uuid(&user.id), "User logged in");

    Ok(Json(TokenResponse {
        token: issued.token,
        token_type: "Bearer".to_string(),
        issued_at: issued.issued_at,
        expires_at: issued.expires_at,
        user: user.into(),
    }))
}

/// Identity and role carried by the bearer token
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "authentication",
    summary = "Validate token",
    responses(
        (status = 200, description = "Token is valid", body = CurrentUser),
        (status = 401, description = "Missing, invalid or expired token"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn me(current_user: CurrentUser) -> Json<CurrentUser> {
    Json(current_user)
}

/// Change the caller's password
#[utoipa::path(
    post,
    path = "/auth/change-password",
    request_body = ChangePasswordRequest,
    tag = "authentication",
    summary = "Change password",
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "New password does not meet the policy"),
        (status = 401, description = "Current password is wrong"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<StatusCode> {
    let user = state.store.get_user(current_user.id).await?.ok_or_else(|| Error::NotFound {
        resource: "User".to_string(),
        id: current_user.id.to_string(),
    })?;

    if !verify_blocking(request.current_password, user.password_hash).await? {
        return Err(AuthError::InvalidCredentials.into());
    }
    password::check_policy(&request.new_password, &state.config.auth.password)?;

    let password_hash = hash_blocking(&state, request.new_password).await?;
    state.store.update_password(user.id, &password_hash).await?;

    info!(user_id = %abbrev_uuid(&user.id), "Password changed");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_PASSWORD, create_test_app, create_test_config, login, register_and_login};
    use serde_json::json;

    #[test_log::test(tokio::test)]
    async fn test_register_then_login() {
        let server = create_test_app(create_test_config()).await;

        let response = server
            .post("/auth/register")
            .json(&json!({ "identity": "nurse1", "password": "Sup3rSecret!" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let user: UserResponse = response.json();
        assert_eq!(user.identity, "nurse1");
        assert_eq!(user.role, Role::Clinician);
        assert!(!response.text().contains("password"));

        let response = server
            .post("/auth/login")
            .json(&json!({ "identity": "nurse1", "password": "Sup3rSecret!" }))
            .await;
        response.assert_status_ok();
        let token: TokenResponse = response.json();
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.user.id, user.id);
        assert_eq!(token.expires_at - token.issued_at, chrono::Duration::days(1));
    }

    #[test_log::test(tokio::test)]
    async fn test_duplicate_registration_conflicts() {
        let server = create_test_app(create_test_config()).await;
        let body = json!({ "identity": "nurse1", "password": "Sup3rSecret!" });

        server.post("/auth/register").json(&body).await.assert_status(StatusCode::CREATED);
        let response = server.post("/auth/register").json(&body).await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<serde_json::Value>()["code"], "conflict");
    }

    #[test_log::test(tokio::test)]
    async fn test_weak_password_and_bad_identity_rejected() {
        let server = create_test_app(create_test_config()).await;

        let response = server
            .post("/auth/register")
            .json(&json!({ "identity": "nurse1", "password": "password" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<serde_json::Value>()["code"], "weak_password");

        server
            .post("/auth/register")
            .json(&json!({ "identity": "no spaces allowed", "password": "Sup3rSecret!" }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[test_log::test(tokio::test)]
    async fn test_admin_role_cannot_be_self_assigned() {
        let server = create_test_app(create_test_config()).await;

        server
            .post("/auth/register")
            .json(&json!({ "identity": "mallory", "password": "Sup3rSecret!", "role": "admin" }))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[test_log::test(tokio::test)]
    async fn test_registration_can_be_disabled() {
        let mut config = create_test_config();
        config.auth.allow_registration = false;
        let server = create_test_app(config).await;

        server
            .post("/auth/register")
            .json(&json!({ "identity": "nurse1", "password": "Sup3rSecret!" }))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[test_log::test(tokio::test)]
    async fn test_login_failures_are_indistinguishable() {
        let server = create_test_app(create_test_config()).await;
        register_and_login(&server, "nurse1", Role::Clinician).await;

        let wrong_password = server
            .post("/auth/login")
            .json(&json!({ "identity": "nurse1", "password": "Wr0ngSecret!" }))
            .await;
        let unknown_user = server
            .post("/auth/login")
            .json(&json!({ "identity": "ghost", "password": TEST_PASSWORD }))
            .await;

        wrong_password.assert_status_unauthorized();
        unknown_user.assert_status_unauthorized();
        assert_eq!(wrong_password.text(), unknown_user.text());
        assert_eq!(wrong_password.json::<serde_json::Value>()["code"], "invalid_credentials");
    }

    #[test_log::test(tokio::test)]
    async fn test_me_reflects_token() {
        let server = create_test_app(create_test_config()).await;
        let token = register_and_login(&server, "viewer1", Role::Viewer).await;

        let response = server.get("/auth/me").authorization_bearer(&token).await;
        response.assert_status_ok();
        let user: CurrentUser = response.json();
        assert_eq!(user.identity, "viewer1");
        assert_eq!(user.role, Role::Viewer);

        server.get("/auth/me").await.assert_status_unauthorized();
        let garbage = server.get("/auth/me").authorization_bearer("not-a-token").await;
        garbage.assert_status_unauthorized();
        assert_eq!(garbage.json::<serde_json::Value>()["code"], "token_invalid");
    }

    #[test_log::test(tokio::test)]
    async fn test_change_password() {
        let server = create_test_app(create_test_config()).await;
        let token = register_and_login(&server, "nurse1", Role::Clinician).await;

        server
            .post("/auth/change-password")
            .authorization_bearer(&token)
            .json(&json!({ "current_password": "Wr0ngSecret!", "new_password": "N3wSecret!!" }))
            .await
            .assert_status_unauthorized();

        server
            .post("/auth/change-password")
            .authorization_bearer(&token)
            .json(&json!({ "current_password": TEST_PASSWORD, "new_password": "N3wSecret!!" }))
            .await
            .assert_status(StatusCode::NO_CONTENT);

        login(&server, "nurse1", "N3wSecret!!").await;
        server
            .post("/auth/login")
            .json(&json!({ "identity": "nurse1", "password": TEST_PASSWORD }))
            .await
            .assert_status_unauthorized();
    }
}
