//! Authentication and authorization.
//!
//! Clients authenticate with an identity and password and receive a signed session token. Every
//! protected route reads the token from the `Authorization: Bearer <token>` header; validation is
//! stateless and needs no store lookup.
//!
//! # Modules
//!
//! - [`current_user`]: Extractor resolving the bearer token into a [`CurrentUser`](crate::api::models::users::CurrentUser)
//! - [`password`]: Password policy, hashing and verification using Argon2
//! - [`session`]: Session token creation and verification
//!
//! # Authorization
//!
//! Access is role based:
//!
//! | Role        | Read records | Write records / predict | Manage users |
//! |-------------|--------------|-------------------------|--------------|
//! | `viewer`    | yes          | no                      | no           |
//! | `clinician` | yes          | yes                     | no           |
//! | `admin`     | yes          | yes                     | yes          |

pub mod current_user;
pub mod password;
pub mod session;

use thiserror::Error;

/// Failures while establishing who the caller is. All surface as 401.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown identity or wrong password; the two are deliberately indistinguishable
    #[error("Invalid identity or password")]
    InvalidCredentials,
    #[error("Session token has expired")]
    TokenExpired,
    /// Bad signature, malformed token or inconsistent claims
    #[error("Session token is invalid")]
    TokenInvalid,
    #[error("Authentication required")]
    MissingToken,
}
