//! Store record models.
//!
//! These are the shapes the store reads and writes, kept distinct from the API models so the
//! storage layout and the wire contract can evolve independently. Postgres rows are decoded into
//! these types in [`crate::db::handlers::postgres`]; the in-memory store holds them directly.
//!
//! - [`users`]: accounts and password hashes
//! - [`patients`]: patient records, with the field checks shared by both backends
//! - [`predictions`]: append-only prediction history
//!
//! Conversion to API models is done with `From` impls on the API side:
//!
//! ```ignore
//! use readmit::api::models::patients::PatientResponse;
//!
//! let record = store.get_patient(id).await?.ok_or(/* ... */)?;
//! let response: PatientResponse = record.into();
//! ```

pub mod patients;
pub mod predictions;
pub mod users;
