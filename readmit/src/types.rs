//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`UserId`]: user account identifier
//! - [`PatientId`]: patient record identifier
//! - [`PredictionId`]: stored prediction identifier
//!
//! [`abbrev_uuid`] shortens IDs for log lines.

use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type PatientId = Uuid;
pub type PredictionId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}
