use crate::auth::AuthError;
use crate::db::errors::DbError;
use crate::inference::ModelError;
use crate::limits::LimiterError;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error as ThisError;
use utoipa::ToSchema;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Credential or session token failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Caller is authenticated but their role does not allow the action
    #[error("Insufficient permissions to {action}")]
    Forbidden { action: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Password rejected by the configured policy
    #[error("Password does not meet requirements: {message}")]
    WeakPassword { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Conflict error, e.g., for duplicate identities
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Client exceeded its request budget for the current window
    #[error("Rate limit exceeded")]
    TooManyRequests { retry_after: Duration },

    /// The request did not complete within the configured timeout
    #[error("Request timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Model scoring failure
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Rate limiter backend failure (fail-closed)
    #[error(transparent)]
    RateLimiter(#[from] LimiterError),

    /// Store operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Body of every error response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable code
    pub code: String,
    pub message: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } | Error::WeakPassword { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Error::Model(model_err) => match model_err {
                ModelError::InvalidFeatureVector(_) => StatusCode::BAD_REQUEST,
                ModelError::LoadFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::RateLimiter(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::Validation { .. } => StatusCode::BAD_REQUEST,
                DbError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Internal { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code clients can match on.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Auth(auth_err) => match auth_err {
                AuthError::InvalidCredentials => "invalid_credentials",
                AuthError::TokenExpired => "token_expired",
                AuthError::TokenInvalid => "token_invalid",
                AuthError::MissingToken => "unauthenticated",
            },
            Error::Forbidden { .. } => "forbidden",
            Error::BadRequest { .. } => "validation_error",
            Error::WeakPassword { .. } => "weak_password",
            Error::NotFound { .. } => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::TooManyRequests { .. } => "rate_limit_exceeded",
            Error::Timeout { .. } => "timeout",
            Error::Model(ModelError::InvalidFeatureVector(_)) => "invalid_feature_vector",
            Error::Model(ModelError::LoadFailure { .. }) => "internal_error",
            Error::RateLimiter(_) => "rate_limiter_unavailable",
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "not_found",
                DbError::UniqueViolation { .. } => "conflict",
                DbError::Validation { .. } => "validation_error",
                DbError::Unavailable { .. } => "store_unavailable",
                DbError::Other(_) => "internal_error",
            },
            Error::Internal { .. } | Error::Other(_) => "internal_error",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Auth(auth_err) => auth_err.to_string(),
            Error::Forbidden { action } => format!("Insufficient permissions to {action}"),
            Error::BadRequest { message } => message.clone(),
            Error::WeakPassword { message } => format!("Password does not meet requirements: {message}"),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::Conflict { message } => message.clone(),
            Error::TooManyRequests { .. } => "Too many requests. Please retry later.".to_string(),
            Error::Timeout { .. } => "The request took too long to complete".to_string(),
            Error::Model(ModelError::InvalidFeatureVector(message)) => message.clone(),
            Error::Model(ModelError::LoadFailure { .. }) => "Internal server error".to_string(),
            Error::RateLimiter(_) => "Rate limiting is temporarily unavailable. Please retry later.".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { table, .. } => match table.as_deref() {
                    Some("users") => "An account with this identity already exists".to_string(),
                    Some("patients") => "A patient with this medical record number already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::Validation { message } => message.clone(),
                DbError::Unavailable { .. } => "The data store is temporarily unavailable. Please retry later.".to_string(),
                DbError::Other(_) => "Internal server error".to_string(),
            },
            Error::Internal { .. } | Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_))
            | Error::Internal { .. }
            | Error::Other(_)
            | Error::Model(ModelError::LoadFailure { .. }) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(DbError::Unavailable { .. }) | Error::RateLimiter(_) | Error::Timeout { .. } => {
                tracing::warn!("Dependency unavailable: {:#}", self);
            }
            Error::Auth(_) | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::TooManyRequests { .. } => {
                tracing::info!("Rate limit exceeded");
            }
            _ => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.user_message(),
        };
        let mut response = (status, Json(body)).into_response();

        if let Error::TooManyRequests { retry_after } = &self {
            // Round up so clients never retry before the window has moved
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        if matches!(self, Error::Auth(_)) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
