//! Store models for prediction history. Predictions are immutable once written.

use chrono::{DateTime, Utc};

use crate::inference::{ContributingFactor, FeatureVector, Recommendations, RiskAssessment, RiskBand};
use crate::types::{PatientId, PredictionId, UserId};

/// Store request for appending a prediction to a patient's history
#[derive(Debug, Clone)]
pub struct PredictionCreateDBRequest {
    /// Chosen by the caller; replaying an append with the same id returns the existing row
    pub id: PredictionId,
    pub patient_id: PatientId,
    pub requested_by: UserId,
    pub features: FeatureVector,
    pub assessment: RiskAssessment,
    pub model_version: String,
}

/// Store response for a prediction
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionDBResponse {
    pub id: PredictionId,
    pub patient_id: PatientId,
    pub requested_by: UserId,
    pub features: FeatureVector,
    pub score: f64,
    pub band: RiskBand,
    pub confidence: f64,
    pub contributing_factors: Vec<ContributingFactor>,
    pub recommendations: Recommendations,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
}

impl PredictionDBResponse {
    pub fn new(request: PredictionCreateDBRequest, created_at: DateTime<Utc>) -> Self {
        let RiskAssessment {
            score,
            band,
            confidence,
            contributing_factors,
            recommendations,
        } = request.assessment;
        Self {
            id: request.id,
            patient_id: request.patient_id,
            requested_by: request.requested_by,
            features: request.features,
            score,
            band,
            confidence,
            contributing_factors,
            recommendations,
            model_version: request.model_version,
            created_at,
        }
    }
}
