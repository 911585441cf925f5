//! In-memory store.
//!
//! Keeps every record in `parking_lot::RwLock`-guarded maps. Suitable for tests and single-process
//! deployments; everything is lost on restart. Each operation takes the lock for its whole
//! read-modify-write, which gives the per-record atomicity the [`Store`] contract requires.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::instrument;
use uuid::Uuid;

use super::{PatientStore, Store, UserStore};
use crate::db::errors::{DbError, Result};
use crate::db::models::{
    patients::{PatientCreateDBRequest, PatientDBResponse, PatientUpdateDBRequest},
    predictions::{PredictionCreateDBRequest, PredictionDBResponse},
    users::{UserCreateDBRequest, UserDBResponse},
};
use crate::types::{PatientId, PredictionId, UserId, abbrev_uuid};

/// Record with its insertion sequence, used for stable ordering.
#[derive(Clone)]
struct Sequenced<T> {
    seq: u64,
    record: T,
}

#[derive(Default)]
struct Tables {
    next_seq: u64,
    users: HashMap<UserId, Sequenced<UserDBResponse>>,
    patients: HashMap<PatientId, Sequenced<PatientDBResponse>>,
    predictions: HashMap<PredictionId, PredictionDBResponse>,
    /// Prediction ids per patient, in append order
    history: HashMap<PatientId, Vec<PredictionId>>,
}

impl Tables {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn identity_taken(&self, identity: &str) -> bool {
        self.users.values().any(|u| u.record.identity == identity)
    }

    fn insert_user(&mut self, request: &UserCreateDBRequest) -> UserDBResponse {
        let now = Utc::now();
        let user = UserDBResponse {
            id: request.id,
            identity: request.identity.clone(),
            password_hash: request.password_hash.clone(),
            role: request.role,
            created_at: now,
            updated_at: now,
        };
        let seq = self.next_seq();
        self.users.insert(
            user.id,
            Sequenced {
                seq,
                record: user.clone(),
            },
        );
        user
    }
}

fn unique_violation(table: &str, constraint: &str) -> DbError {
    DbError::UniqueViolation {
        constraint: Some(constraint.to_string()),
        table: Some(table.to_string()),
        message: format!("duplicate key value violates unique constraint \"{constraint}\""),
    }
}

fn page<T: Clone>(mut rows: Vec<&Sequenced<T>>, skip: i64, limit: i64) -> (Vec<T>, i64) {
    rows.sort_by_key(|row| row.seq);
    let total = rows.len() as i64;
    let records = rows
        .into_iter()
        .skip(skip.max(0) as usize)
        .take(limit.max(0) as usize)
        .map(|row| row.record.clone())
        .collect();
    (records, total)
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl UserStore for InMemoryStore {
    #[instrument(skip(self, request), fields(identity = %request.identity), err)]
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.users.get(&request.id) {
            if existing.record.identity == request.identity {
                return Ok(existing.record.clone());
            }
            return Err(unique_violation("users", "users_pkey"));
        }
        if tables.identity_taken(&request.identity) {
            return Err(unique_violation("users", "users_identity_key"));
        }
        Ok(tables.insert_user(request))
    }

    #[instrument(skip(self, request), fields(identity = %request.identity), err)]
    async fn upsert_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.users.values_mut().find(|u| u.record.identity == request.identity) {
            existing.record.password_hash = request.password_hash.clone();
            existing.record.role = request.role;
            existing.record.updated_at = Utc::now();
            return Ok(existing.record.clone());
        }
        Ok(tables.insert_user(request))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        Ok(self.tables.read().users.get(&id).map(|u| u.record.clone()))
    }

    async fn get_user_by_identity(&self, identity: &str) -> Result<Option<UserDBResponse>> {
        let tables = self.tables.read();
        Ok(tables
            .users
            .values()
            .find(|u| u.record.identity == identity)
            .map(|u| u.record.clone()))
    }

    async fn list_users(&self, skip: i64, limit: i64) -> Result<(Vec<UserDBResponse>, i64)> {
        let tables = self.tables.read();
        Ok(page(tables.users.values().collect(), skip, limit))
    }

    #[instrument(skip(self, password_hash), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn update_password(&self, id: UserId, password_hash: &str) -> Result<UserDBResponse> {
        let mut tables = self.tables.write();
        let user = tables.users.get_mut(&id).ok_or(DbError::NotFound)?;
        user.record.password_hash = password_hash.to_string();
        user.record.updated_at = Utc::now();
        Ok(user.record.clone())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn delete_user(&self, id: UserId) -> Result<bool> {
        Ok(self.tables.write().users.remove(&id).is_some())
    }
}

#[async_trait::async_trait]
impl PatientStore for InMemoryStore {
    #[instrument(skip(self, request), fields(mrn = %request.medical_record_number), err)]
    async fn create_patient(&self, request: &PatientCreateDBRequest) -> Result<PatientDBResponse> {
        request.validate()?;

        let mut tables = self.tables.write();
        if let Some(existing) = tables.patients.get(&request.id) {
            if existing.record.medical_record_number == request.medical_record_number {
                return Ok(existing.record.clone());
            }
            return Err(unique_violation("patients", "patients_pkey"));
        }
        if tables
            .patients
            .values()
            .any(|p| p.record.medical_record_number == request.medical_record_number)
        {
            return Err(unique_violation("patients", "patients_medical_record_number_key"));
        }

        let now = Utc::now();
        let patient = PatientDBResponse {
            id: request.id,
            medical_record_number: request.medical_record_number.clone(),
            features: request.features.clone(),
            diagnosis_codes: request.diagnosis_codes.clone(),
            vitals: request.vitals.clone(),
            readmitted: request.readmitted,
            created_by: request.created_by,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let seq = tables.next_seq();
        tables.patients.insert(
            patient.id,
            Sequenced {
                seq,
                record: patient.clone(),
            },
        );
        Ok(patient)
    }

    async fn get_patient(&self, id: PatientId) -> Result<Option<PatientDBResponse>> {
        Ok(self.tables.read().patients.get(&id).map(|p| p.record.clone()))
    }

    async fn list_patients(&self, skip: i64, limit: i64) -> Result<(Vec<PatientDBResponse>, i64)> {
        let tables = self.tables.read();
        let live = tables.patients.values().filter(|p| !p.record.is_deleted()).collect();
        Ok(page(live, skip, limit))
    }

    #[instrument(skip(self, update), fields(patient_id = %abbrev_uuid(&id)), err)]
    async fn update_patient(&self, id: PatientId, update: &PatientUpdateDBRequest) -> Result<PatientDBResponse> {
        let mut tables = self.tables.write();
        let patient = tables
            .patients
            .get_mut(&id)
            .filter(|p| !p.record.is_deleted())
            .ok_or(DbError::NotFound)?;
        patient.record.apply(update, Utc::now())?;
        Ok(patient.record.clone())
    }

    #[instrument(skip(self), fields(patient_id = %abbrev_uuid(&id)), err)]
    async fn soft_delete_patient(&self, id: PatientId) -> Result<bool> {
        let mut tables = self.tables.write();
        match tables.patients.get_mut(&id) {
            Some(patient) if !patient.record.is_deleted() => {
                let now = Utc::now();
                patient.record.deleted_at = Some(now);
                patient.record.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    #[instrument(skip(self, request), fields(patient_id = %abbrev_uuid(&request.patient_id)), err)]
    async fn append_prediction(&self, request: PredictionCreateDBRequest) -> Result<PredictionDBResponse> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.predictions.get(&request.id) {
            if existing.patient_id == request.patient_id {
                return Ok(existing.clone());
            }
            return Err(unique_violation("predictions", "predictions_pkey"));
        }
        let live = tables.patients.get(&request.patient_id).is_some_and(|p| !p.record.is_deleted());
        if !live {
            return Err(DbError::NotFound);
        }

        // Keep history timestamps non-decreasing even if the wall clock steps back
        let last: Option<DateTime<Utc>> = tables
            .history
            .get(&request.patient_id)
            .and_then(|ids| ids.last())
            .and_then(|id| tables.predictions.get(id))
            .map(|p| p.created_at);
        let created_at = last.map_or_else(Utc::now, |last| last.max(Utc::now()));

        let patient_id = request.patient_id;
        let prediction = PredictionDBResponse::new(request, created_at);
        tables.predictions.insert(prediction.id, prediction.clone());
        tables.history.entry(patient_id).or_default().push(prediction.id);
        Ok(prediction)
    }

    async fn prediction_history(&self, patient_id: PatientId) -> Result<Vec<PredictionDBResponse>> {
        let tables = self.tables.read();
        if !tables.patients.contains_key(&patient_id) {
            return Err(DbError::NotFound);
        }
        Ok(tables
            .history
            .get(&patient_id)
            .map(|ids| ids.iter().filter_map(|id| tables.predictions.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    async fn get_prediction(&self, id: PredictionId) -> Result<Option<PredictionDBResponse>> {
        Ok(self.tables.read().predictions.get(&id).cloned())
    }
}

impl Store for InMemoryStore {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::contract;
    use crate::db::models::patients::PatientUpdateDBRequest;
    use crate::inference::FeatureInput;
    use crate::test_utils::sample_features;

    #[tokio::test]
    async fn test_users_round_trip() {
        contract::users_round_trip(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_upsert_refreshes_existing_user() {
        contract::upsert_refreshes_existing_user(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_patients_lifecycle() {
        contract::patients_lifecycle(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_history_is_ordered_and_survives_soft_delete() {
        contract::history_is_ordered_and_survives_soft_delete(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_replayed_inserts_are_idempotent() {
        contract::replayed_inserts_are_idempotent(&InMemoryStore::new()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        let store = InMemoryStore::new();
        let patient = store
            .create_patient(&PatientCreateDBRequest {
                id: Uuid::new_v4(),
                medical_record_number: "MRN-C".to_string(),
                features: sample_features(),
                diagnosis_codes: vec![],
                vitals: None,
                readmitted: None,
                created_by: Uuid::new_v4(),
            })
            .await
            .unwrap();

        // Each task patches a different field; every patch must survive
        let patches = [
            FeatureInput {
                num_procedures: Some(9),
                ..Default::default()
            },
            FeatureInput {
                days_in_hospital: Some(14),
                ..Default::default()
            },
            FeatureInput {
                prior_admissions: Some(4),
                ..Default::default()
            },
            FeatureInput {
                comorbidity_score: Some(6.0),
                ..Default::default()
            },
        ];
        let handles: Vec<_> = patches
            .into_iter()
            .map(|patch| {
                let store = store.clone();
                tokio::spawn(async move {
                    let update = PatientUpdateDBRequest {
                        features: Some(patch),
                        ..Default::default()
                    };
                    store.update_patient(patient.id, &update).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let merged = store.get_patient(patient.id).await.unwrap().unwrap().features;
        assert_eq!(merged.num_procedures, 9);
        assert_eq!(merged.days_in_hospital, 14);
        assert_eq!(merged.prior_admissions, 4);
        assert_eq!(merged.comorbidity_score, 6.0);
    }
}
