//! Session token creation and verification.
//!
//! Tokens are HS256 JWTs signed with the configured `secret_key`. Expiry is checked here rather
//! than by `jsonwebtoken` so that the boundary is exact: a token is accepted up to and including
//! its `exp` second and rejected with [`AuthError::TokenExpired`] strictly after it.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{
    api::models::users::{CurrentUser, Role},
    auth::AuthError,
    config::Config,
    errors::Error,
    types::UserId,
};

/// JWT session claims
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: UserId,      // Subject (user ID)
    pub identity: String, // Login identity
    pub role: Role,       // Granted role
    pub iat: i64,         // Issued at
    pub exp: i64,         // Expiration time
}

/// A freshly signed token with its validity interval.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionClaims {
    pub fn new(user: &CurrentUser, issued_at: DateTime<Utc>, lifetime: chrono::Duration) -> Self {
        Self {
            sub: user.id,
            identity: user.identity.clone(),
            role: user.role,
            iat: issued_at.timestamp(),
            exp: (issued_at + lifetime).timestamp(),
        }
    }
}

impl From<SessionClaims> for CurrentUser {
    fn from(claims: SessionClaims) -> Self {
        Self {
            id: claims.sub,
            identity: claims.identity,
            role: claims.role,
        }
    }
}

fn secret(config: &Config) -> Result<&[u8], Error> {
    config
        .secret_key
        .as_deref()
        .map(str::as_bytes)
        .ok_or_else(|| Error::Internal {
            operation: "sign session: secret_key is required".to_string(),
        })
}

/// Create a session token for a user, valid for the configured lifetime from now.
pub fn create_session_token(user: &CurrentUser, config: &Config) -> Result<IssuedToken, Error> {
    create_session_token_at(user, config, Utc::now())
}

/// Create a session token as if issued at `issued_at`.
pub fn create_session_token_at(user: &CurrentUser, config: &Config, issued_at: DateTime<Utc>) -> Result<IssuedToken, Error> {
    let claims = SessionClaims::new(user, issued_at, config.auth.token_lifetime());
    if claims.exp <= claims.iat {
        return Err(Error::Internal {
            operation: "create session: token lifetime must be positive".to_string(),
        });
    }

    let key = EncodingKey::from_secret(secret(config)?);
    let token = encode(&Header::new(Algorithm::HS256), &claims, &key).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })?;

    Ok(IssuedToken {
        token,
        issued_at: timestamp(claims.iat)?,
        expires_at: timestamp(claims.exp)?,
    })
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, Error> {
    Utc.timestamp_opt(secs, 0).single().ok_or_else(|| Error::Internal {
        operation: format!("convert timestamp {secs}"),
    })
}

/// Verify and decode a session token against the current time.
pub fn verify_session_token(token: &str, config: &Config) -> Result<CurrentUser, Error> {
    verify_session_token_at(token, config, Utc::now())
}

/// Verify and decode a session token as of `now`.
pub fn verify_session_token_at(token: &str, config: &Config, now: DateTime<Utc>) -> Result<CurrentUser, Error> {
    let key = DecodingKey::from_secret(secret(config)?);
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.set_required_spec_claims(&["exp", "iat", "sub"]);

    let token_data = decode::<SessionClaims>(token, &key, &validation).map_err(|e| match e.kind() {
        // Client errors (401) - malformed tokens, bad signatures, missing claims
        jsonwebtoken::errors::ErrorKind::InvalidToken
        | jsonwebtoken::errors::ErrorKind::InvalidSignature
        | jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_)
        | jsonwebtoken::errors::ErrorKind::InvalidIssuer
        | jsonwebtoken::errors::ErrorKind::InvalidAudience
        | jsonwebtoken::errors::ErrorKind::InvalidSubject
        | jsonwebtoken::errors::ErrorKind::ImmatureSignature
        | jsonwebtoken::errors::ErrorKind::Base64(_)
        | jsonwebtoken::errors::ErrorKind::Json(_)
        | jsonwebtoken::errors::ErrorKind::Utf8(_)
        | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => Error::Auth(AuthError::TokenInvalid),

        jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::Auth(AuthError::TokenExpired),

        // Server errors (500) - key issues, internal failures
        _ => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },
    })?;

    let claims = token_data.claims;
    if claims.exp <= claims.iat {
        return Err(Error::Auth(AuthError::TokenInvalid));
    }
    if now.timestamp() > claims.exp {
        return Err(Error::Auth(AuthError::TokenExpired));
    }

    Ok(CurrentUser::from(claims))
}
