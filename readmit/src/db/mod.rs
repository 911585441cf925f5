//! Persistence for users, patient records and prediction history.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (API request handlers)
//! └──────┬──────┘
//!        │  Arc<dyn Store>
//!        ↓
//! ┌─────────────┐
//! │   Stores    │  (db::handlers - InMemoryStore / PostgresStore)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - store records)
//! └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: the [`Store`](handlers::Store) traits and both backends
//! - [`models`]: record structures read and written by the stores
//! - [`errors`]: store error type shared by both backends
//! - [`retry`]: bounded exponential backoff for transient failures
//!
//! # Migrations
//!
//! Postgres migrations live in the `migrations/` directory and are applied on connect through
//! [`crate::migrator`]:
//!
//! ```ignore
//! readmit::migrator().run(&pool).await?;
//! ```

pub mod errors;
pub mod handlers;
pub mod models;
pub mod retry;

use std::sync::Arc;

use tracing::info;

use crate::config::DatabaseConfig;
use handlers::{InMemoryStore, PostgresStore, Store};

/// Build the store selected by configuration.
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn Store>> {
    match config {
        DatabaseConfig::Memory => {
            info!("Using in-memory store; records are lost on restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
        DatabaseConfig::Postgres {
            url,
            username,
            password,
            pool,
            retry,
        } => {
            let store = PostgresStore::connect(url, username.as_deref(), password.as_deref(), pool, retry.clone()).await?;
            Ok(Arc::new(store))
        }
    }
}
