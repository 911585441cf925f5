//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//! - **[`extract`]**: Extractors that report rejections in the JSON error format
//!
//! # API Structure
//!
//! - **Health** (`/health`): liveness
//! - **Authentication** (`/auth/*`): registration, login, token introspection, password change
//! - **Users** (`/users/*`): account administration
//! - **Patients** (`/patients/*`): patient records and prediction history
//! - **Predictions** (`/predict`, `/predictions/*`): risk scoring
//! - **Model** (`/model`): active model description
//!
//! All endpoints are documented with `utoipa`; the rendered reference is served at `/docs`.

pub mod extract;
pub mod handlers;
pub mod models;
