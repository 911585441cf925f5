//! HTTP request handlers for all API endpoints.
//!
//! Each handler is responsible for:
//! - Request validation and deserialization
//! - Authentication and role checks
//! - Calling the inference engine and the store
//! - Response serialization
//!
//! # Handler Modules
//!
//! - [`auth`]: Registration, login, token inspection and password changes
//! - [`health`]: Liveness check
//! - [`model`]: Description of the loaded model
//! - [`patients`]: Patient record CRUD and prediction history
//! - [`predictions`]: Scoring and stored prediction lookup
//! - [`users`]: Account administration
//!
//! # Authentication
//!
//! Protected handlers take a [`CurrentUser`](crate::api::models::users::CurrentUser) argument,
//! which resolves the `Authorization: Bearer` token or rejects with 401.
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`], which converts to the status code and JSON error
//! body for its variant.

pub mod auth;
pub mod health;
pub mod model;
pub mod patients;
pub mod predictions;
pub mod users;
