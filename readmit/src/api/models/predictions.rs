use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::predictions::PredictionDBResponse;
use crate::inference::{ContributingFactor, FeatureInput, FeatureVector, Recommendations, RiskBand};
use crate::types::{PatientId, PredictionId, UserId};

/// Prediction request. Exactly one of `patient_id` or `features` must be supplied.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PredictRequest {
    /// Score a stored patient and append the result to their history
    #[schema(value_type = Option<String>, format = "uuid")]
    pub patient_id: Option<PatientId>,
    /// Score an ad-hoc feature set without persisting anything
    pub features: Option<FeatureInput>,
}

/// Which input a prediction request resolved to.
#[derive(Debug)]
pub enum PredictTarget {
    Patient(PatientId),
    Features(FeatureInput),
}

impl PredictRequest {
    pub fn target(self) -> Result<PredictTarget, String> {
        match (self.patient_id, self.features) {
            (Some(id), None) => Ok(PredictTarget::Patient(id)),
            (None, Some(features)) => Ok(PredictTarget::Features(features)),
            (Some(_), Some(_)) => Err("Supply either patient_id or features, not both".to_string()),
            (None, None) => Err("Either patient_id or features is required".to_string()),
        }
    }
}

/// A scored prediction.
///
/// `id` and `patient_id` are null for ad-hoc feature predictions, which are not stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PredictionResponse {
    #[schema(value_type = Option<String>, format = "uuid")]
    pub id: Option<PredictionId>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub patient_id: Option<PatientId>,
    /// Readmission probability in [0, 1]
    pub score: f64,
    pub band: RiskBand,
    pub confidence: f64,
    pub contributing_factors: Vec<ContributingFactor>,
    pub recommendations: Recommendations,
    /// Version tag of the model that produced this score
    pub model_version: String,
    pub features: FeatureVector,
    #[schema(value_type = String, format = "uuid")]
    pub requested_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl From<PredictionDBResponse> for PredictionResponse {
    fn from(db: PredictionDBResponse) -> Self {
        Self {
            id: Some(db.id),
            patient_id: Some(db.patient_id),
            score: db.score,
            band: db.band,
            confidence: db.confidence,
            contributing_factors: db.contributing_factors,
            recommendations: db.recommendations,
            model_version: db.model_version,
            features: db.features,
            requested_by: db.requested_by,
            created_at: db.created_at,
        }
    }
}
