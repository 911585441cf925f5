//! Patient record request and response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::patients::PatientDBResponse;
use crate::inference::{FeatureInput, FeatureVector};
use crate::types::{PatientId, UserId};

/// Vital signs recorded at intake. Every reading is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct Vitals {
    /// Beats per minute
    pub heart_rate: Option<i32>,
    /// mmHg
    pub systolic_bp: Option<i32>,
    /// mmHg
    pub diastolic_bp: Option<i32>,
    pub temperature_celsius: Option<f64>,
    /// Breaths per minute
    pub respiratory_rate: Option<i32>,
    /// Percent, 0-100
    pub oxygen_saturation: Option<f64>,
}

/// Request to create a patient record
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PatientCreate {
    /// Hospital medical record number (must be unique)
    pub medical_record_number: String,
    pub features: FeatureInput,
    /// ICD-10 codes, e.g. `I50.9`
    #[serde(default)]
    pub diagnosis_codes: Vec<String>,
    pub vitals: Option<Vitals>,
    /// Observed outcome, when known
    pub readmitted: Option<bool>,
}

/// Partial update of a patient record. Absent fields are left unchanged; `features` is merged
/// field by field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PatientUpdate {
    pub features: Option<FeatureInput>,
    pub diagnosis_codes: Option<Vec<String>>,
    pub vitals: Option<Vitals>,
    pub readmitted: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PatientResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: PatientId,
    pub medical_record_number: String,
    pub features: FeatureVector,
    pub diagnosis_codes: Vec<String>,
    pub vitals: Option<Vitals>,
    pub readmitted: Option<bool>,
    #[schema(value_type = String, format = "uuid")]
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PatientDBResponse> for PatientResponse {
    fn from(db: PatientDBResponse) -> Self {
        Self {
            id: db.id,
            medical_record_number: db.medical_record_number,
            features: db.features,
            diagnosis_codes: db.diagnosis_codes,
            vitals: db.vitals,
            readmitted: db.readmitted,
            created_by: db.created_by,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}
