//! API request and response data models.
//!
//! API models are kept separate from the store records in [`crate::db::models`] so the wire
//! contract and the storage layout can evolve independently. Every model derives `utoipa`
//! schemas for the generated OpenAPI document.
//!
//! - [`auth`]: registration, login and password change payloads
//! - [`users`]: roles, the authenticated caller, account summaries
//! - [`patients`]: patient record create/update/response
//! - [`predictions`]: prediction requests and stored results
//! - [`pagination`]: `skip`/`limit` query parameters and paged responses

pub mod auth;
pub mod pagination;
pub mod patients;
pub mod predictions;
pub mod users;
