use crate::{
    AppState,
    api::models::users::{CurrentUser, Role},
    auth::{AuthError, session},
    errors::{Error, Result},
};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use tracing::{instrument, trace};

/// Pull the bearer token out of the `Authorization` header.
/// Returns:
/// - None: no Authorization header, or not a Bearer scheme
/// - Some(token): the raw token text
fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let Some(token) = bearer_token(parts) else {
            trace!("No bearer token on request");
            return Err(AuthError::MissingToken.into());
        };

        let user = session::verify_session_token(token, &state.config)?;
        trace!(user_id = %user.id, role = user.role.as_str(), "Authenticated request");
        Ok(user)
    }
}

impl CurrentUser {
    /// Fail with `Forbidden` unless the caller holds one of `allowed`.
    pub fn require(&self, allowed: &[Role], action: &str) -> Result<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(Error::Forbidden {
                action: action.to_string(),
            })
        }
    }

    pub fn require_admin(&self, action: &str) -> Result<()> {
        self.require(&[Role::Admin], action)
    }

    pub fn require_clinical_write(&self, action: &str) -> Result<()> {
        if self.role.can_write_clinical() {
            Ok(())
        } else {
            Err(Error::Forbidden {
                action: action.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_app_state, create_test_user};
    use axum::http::Request;

    fn parts_with(header_value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/patients");
        if let Some(value) = header_value {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_valid_bearer_token_authenticates() {
        let state = create_test_app_state().await;
        let user = create_test_user(Role::Viewer);
        let issued = session::create_session_token(&user, &state.config).unwrap();

        let mut parts = parts_with(Some(&format!("Bearer {}", issued.token)));
        let resolved = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(resolved, user);

        // Scheme is case-insensitive
        let mut parts = parts_with(Some(&format!("bearer {}", issued.token)));
        assert!(CurrentUser::from_request_parts(&mut parts, &state).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_or_foreign_scheme_is_unauthenticated() {
        let state = create_test_app_state().await;
        for header_value in [None, Some("Basic bnVyc2UxOnB3"), Some("Bearer "), Some("Bearer")] {
            let mut parts = parts_with(header_value);
            let err = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap_err();
            assert!(matches!(err, Error::Auth(AuthError::MissingToken)), "{header_value:?}");
        }
    }

    #[tokio::test]
    async fn test_garbage_token_is_invalid() {
        let state = create_test_app_state().await;
        let mut parts = parts_with(Some("Bearer definitely.not.valid"));
        let err = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::TokenInvalid)));
    }

    #[test]
    fn test_role_checks() {
        let viewer = create_test_user(Role::Viewer);
        let clinician = create_test_user(Role::Clinician);
        let admin = create_test_user(Role::Admin);

        assert!(matches!(viewer.require_clinical_write("predict"), Err(Error::Forbidden { .. })));
        assert!(clinician.require_clinical_write("predict").is_ok());
        assert!(admin.require_clinical_write("predict").is_ok());

        assert!(clinician.require_admin("list users").is_err());
        assert!(admin.require_admin("list users").is_ok());
        assert!(viewer.require(&[Role::Viewer, Role::Admin], "read").is_ok());
    }
}
