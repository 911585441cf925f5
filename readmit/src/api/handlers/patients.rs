use axum::{extract::State, http::StatusCode};
use tracing::info;

use crate::{
    AppState,
    api::extract::{Json, Path, Query},
    api::models::{
        pagination::{PaginatedResponse, Pagination},
        patients::{PatientCreate, PatientResponse, PatientUpdate},
        predictions::PredictionResponse,
        users::CurrentUser,
    },
    db::{
        errors::DbError,
        models::patients::{PatientCreateDBRequest, PatientUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{PatientId, abbrev_uuid},
};

pub(crate) fn patient_not_found(id: PatientId) -> Error {
    Error::NotFound {
        resource: "Patient".to_string(),
        id: id.to_string(),
    }
}

/// Map a store `NotFound` to a 404 naming the patient.
fn or_patient_not_found(id: PatientId) -> impl FnOnce(DbError) -> Error {
    move |err| match err {
        DbError::NotFound => patient_not_found(id),
        other => other.into(),
    }
}

/// Create a patient record
#[utoipa::path(
    post,
    path = "/patients",
    request_body = PatientCreate,
    tag = "patients",
    summary = "Create patient",
    responses(
        (status = 201, description = "Patient created", body = PatientResponse),
        (status = 400, description = "Missing or invalid features"),
        (status = 403, description = "Clinician or admin role required"),
        (status = 409, description = "Medical record number already in use"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_patient(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(create): Json<PatientCreate>,
) -> Result<(StatusCode, Json<PatientResponse>)> {
    current_user.require_clinical_write("create patient records")?;

    let features = create.features.validate()?;
    state.engine.check_categories(&create.features)?;

    let request = PatientCreateDBRequest::new(create, features, current_user.id);
    let patient = state.store.create_patient(&request).await?;

    info!(patient_id = %abbrev_uuid(&patient.id), created_by = %abbrev_uuid(&current_user.id), "Created patient record");
    Ok((StatusCode::CREATED, Json(patient.into())))
}

/// List live patient records
#[utoipa::path(
    get,
    path = "/patients",
    tag = "patients",
    summary = "List patients",
    params(Pagination),
    responses(
        (status = 200, description = "Page of patients", body = PaginatedResponse<PatientResponse>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_patients(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<PatientResponse>>> {
    let (skip, limit) = pagination.params();
    let (patients, total_count) = state.store.list_patients(skip, limit).await?;
    let data = patients.into_iter().map(PatientResponse::from).collect();
    Ok(Json(PaginatedResponse::new(data, total_count, skip, limit)))
}

/// Get a patient record
#[utoipa::path(
    get,
    path = "/patients/{id}",
    tag = "patients",
    summary = "Get patient",
    params(("id" = String, Path, description = "Patient ID")),
    responses(
        (status = 200, description = "Patient record", body = PatientResponse),
        (status = 404, description = "Unknown or deleted patient"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_patient(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(id): Path<PatientId>,
) -> Result<Json<PatientResponse>> {
    let patient = state
        .store
        .get_patient(id)
        .await?
        .filter(|p| !p.is_deleted())
        .ok_or_else(|| patient_not_found(id))?;
    Ok(Json(patient.into()))
}

/// Partially update a patient record
#[utoipa::path(
    patch,
    path = "/patients/{id}",
    request_body = PatientUpdate,
    tag = "patients",
    summary = "Update patient",
    params(("id" = String, Path, description = "Patient ID")),
    responses(
        (status = 200, description = "Updated record", body = PatientResponse),
        (status = 400, description = "Invalid field values"),
        (status = 403, description = "Clinician or admin role required"),
        (status = 404, description = "Unknown or deleted patient"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_patient(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<PatientId>,
    Json(update): Json<PatientUpdate>,
) -> Result<Json<PatientResponse>> {
    current_user.require_clinical_write("update patient records")?;

    if let Some(patch) = &update.features {
        state.engine.check_categories(patch)?;
    }

    let request = PatientUpdateDBRequest::from(update);
    let patient = state
        .store
        .update_patient(id, &request)
        .await
        .map_err(or_patient_not_found(id))?;
    Ok(Json(patient.into()))
}

/// Soft-delete a patient record
#[utoipa::path(
    delete,
    path = "/patients/{id}",
    tag = "patients",
    summary = "Delete patient",
    params(("id" = String, Path, description = "Patient ID")),
    responses(
        (status = 204, description = "Patient deleted"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Unknown or already deleted patient"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_patient(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<PatientId>,
) -> Result<StatusCode> {
    current_user.require_admin("delete patient records")?;

    if !state.store.soft_delete_patient(id).await? {
        return Err(patient_not_found(id));
    }

    info!(patient_id = %abbrev_uuid(&id), deleted_by = %abbrev_uuid(&current_user.id), "Soft-deleted patient record");
    Ok(StatusCode::NO_CONTENT)
}

/// Prediction history for a patient, oldest first
#[utoipa::path(
    get,
    path = "/patients/{id}/history",
    tag = "patients",
    summary = "Prediction history",
    params(("id" = String, Path, description = "Patient ID")),
    responses(
        (status = 200, description = "Predictions ordered by creation time", body = Vec<PredictionResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Unknown patient"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_history(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(id): Path<PatientId>,
) -> Result<Json<Vec<PredictionResponse>>> {
    let history = state
        .store
        .prediction_history(id)
        .await
        .map_err(or_patient_not_found(id))?;
    Ok(Json(history.into_iter().map(PredictionResponse::from).collect()))
}
