use axum::extract::State;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    AppState,
    api::extract::{Json, Path},
    api::handlers::patients::patient_not_found,
    api::models::{
        predictions::{PredictRequest, PredictTarget, PredictionResponse},
        users::CurrentUser,
    },
    db::{errors::DbError, models::predictions::PredictionCreateDBRequest},
    errors::{Error, Result},
    inference::RiskAssessment,
    types::{PredictionId, abbrev_uuid},
};

fn record_prediction(assessment: &RiskAssessment) {
    metrics::counter!("readmit_predictions_total", "band" => assessment.band.as_str()).increment(1);
}

/// Score readmission risk
///
/// With `patient_id` the stored record is scored and the result is appended to that patient's
/// history. With `features` the result is returned without being stored.
#[utoipa::path(
    post,
    path = "/predict",
    request_body = PredictRequest,
    tag = "predictions",
    summary = "Predict readmission risk",
    responses(
        (status = 200, description = "Risk assessment", body = PredictionResponse),
        (status = 400, description = "Malformed request or invalid feature vector"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Clinician or admin role required"),
        (status = 404, description = "Unknown or deleted patient"),
        (status = 429, description = "Rate limit exceeded"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn predict(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<PredictRequest>,
) -> Result<Json<PredictionResponse>> {
    current_user.require_clinical_write("request predictions")?;

    let target = request.target().map_err(|message| Error::BadRequest { message })?;
    match target {
        PredictTarget::Patient(patient_id) => {
            let patient = state
                .store
                .get_patient(patient_id)
                .await?
                .filter(|p| !p.is_deleted())
                .ok_or_else(|| patient_not_found(patient_id))?;

            let assessment = state.engine.predict(&patient.features)?;
            record_prediction(&assessment);

            let stored = state
                .store
                .append_prediction(PredictionCreateDBRequest {
                    id: Uuid::new_v4(),
                    patient_id,
                    requested_by: current_user.id,
                    features: patient.features,
                    assessment,
                    model_version: state.engine.version().to_string(),
                })
                .await
                .map_err(|err| match err {
                    // Deleted between the read and the append
                    DbError::NotFound => patient_not_found(patient_id),
                    other => other.into(),
                })?;

            info!(
                prediction_id = %abbrev_uuid(&stored.id),
                patient_id = %abbrev_uuid(&patient_id),
                band = stored.band.as_str(),
                "Stored prediction"
            );
            Ok(Json(stored.into()))
        }
        PredictTarget::Features(input) => {
            let features = input.validate()?;
            let assessment = state.engine.predict(&features)?;
            record_prediction(&assessment);
            debug!(band = assessment.band.as_str(), "Scored ad-hoc features");

            Ok(Json(PredictionResponse {
                id: None,
                patient_id: None,
                score: assessment.score,
                band: assessment.band,
                confidence: assessment.confidence,
                contributing_factors: assessment.contributing_factors,
                recommendations: assessment.recommendations,
                model_version: state.engine.version().to_string(),
                features,
                requested_by: current_user.id,
                created_at: Utc::now(),
            }))
        }
    }
}

/// Get a stored prediction
#[utoipa::path(
    get,
    path = "/predictions/{id}",
    tag = "predictions",
    summary = "Get prediction",
    params(("id" = String, Path, description = "Prediction ID")),
    responses(
        (status = 200, description = "Stored prediction", body = PredictionResponse),
        (status = 404, description = "Prediction not found"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_prediction(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(id): Path<PredictionId>,
) -> Result<Json<PredictionResponse>> {
    let prediction = state.store.get_prediction(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Prediction".to_string(),
        id: id.to_string(),
    })?;
    Ok(Json(prediction.into()))
}
