use axum::{extract::State, http::StatusCode};
use tracing::info;

use crate::{
    AppState,
    api::extract::{Json, Path, Query},
    api::models::{
        pagination::{PaginatedResponse, Pagination},
        users::{CurrentUser, UserResponse},
    },
    errors::{Error, Result},
    types::{UserId, abbrev_uuid},
};

/// List user accounts
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    summary = "List users",
    params(Pagination),
    responses(
        (status = 200, description = "Page of users", body = PaginatedResponse<UserResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin role required"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<UserResponse>>> {
    current_user.require_admin("list users")?;

    let (skip, limit) = pagination.params();
    let (users, total_count) = state.store.list_users(skip, limit).await?;
    let data = users.into_iter().map(UserResponse::from).collect();
    Ok(Json(PaginatedResponse::new(data, total_count, skip, limit)))
}

/// Delete a user account
#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "users",
    summary = "Delete user",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 400, description = "Cannot delete your own account"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "User not found"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_user(State(state): State<AppState>, current_user: CurrentUser, Path(id): Path<UserId>) -> Result<StatusCode> {
    current_user.require_admin("delete users")?;

    if id == current_user.id {
        return Err(Error::BadRequest {
            message: "You cannot delete your own account".to_string(),
        });
    }

    if !state.store.delete_user(id).await? {
        return Err(Error::NotFound {
            resource: "User".to_string(),
            id: id.to_string(),
        });
    }

    info!(user_id = %abbrev_uuid(&id), deleted_by = %abbrev_uuid(&current_user.id), "Deleted user");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::test_utils::{admin_token, create_test_app, create_test_config, register_and_login};
    use uuid::Uuid;

    #[test_log::test(tokio::test)]
    async fn test_list_users_requires_admin() {
        let server = create_test_app(create_test_config()).await;
        let clinician = register_and_login(&server, "nurse1", Role::Clinician).await;
        let admin = admin_token(&server).await;

        server
            .get("/users")
            .authorization_bearer(&clinician)
            .await
            .assert_status_forbidden();

        let response = server.get("/users?limit=1").authorization_bearer(&admin).await;
        response.assert_status_ok();
        let page: PaginatedResponse<UserResponse> = response.json();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.limit, 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_delete_user() {
        let server = create_test_app(create_test_config()).await;
        register_and_login(&server, "nurse1", Role::Clinician).await;
        let admin = admin_token(&server).await;

        let me: CurrentUser = server.get("/auth/me").authorization_bearer(&admin).await.json();
        server
            .delete(&format!("/users/{}", me.id))
            .authorization_bearer(&admin)
            .await
            .assert_status_bad_request();

        let page: PaginatedResponse<UserResponse> = server.get("/users").authorization_bearer(&admin).await.json();
        let nurse = page.data.iter().find(|u| u.identity == "nurse1").unwrap();

        server
            .delete(&format!("/users/{}", nurse.id))
            .authorization_bearer(&admin)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .delete(&format!("/users/{}", Uuid::new_v4()))
            .authorization_bearer(&admin)
            .await
            .assert_status_not_found();
        server
            .post("/auth/login")
            .json(&serde_json::json!({ "identity": "nurse1", "password": crate::test_utils::TEST_PASSWORD }))
            .await
            .assert_status_unauthorized();
    }

    #[test_log::test(tokio::test)]
    async fn test_unauthenticated_requests_rejected_before_validation() {
        let server = create_test_app(create_test_config()).await;

        server.get("/users?limit=abc").await.assert_status_unauthorized();
        server.delete("/users/not-a-uuid").await.assert_status_unauthorized();
        server.get("/predictions/not-a-uuid").await.assert_status_unauthorized();
    }
}
