//! Store interfaces and their backends.
//!
//! Request handlers talk to persistence only through the [`UserStore`] and [`PatientStore`]
//! traits, combined as [`Store`]. Two backends implement them:
//!
//! - [`InMemoryStore`]: `parking_lot` maps, for tests and single-node demos
//! - [`PostgresStore`]: sqlx pool with migrations and bounded retry of transient errors
//!
//! # Guarantees
//!
//! - Every write is atomic per record: concurrent readers see a record either before or after a
//!   write, never half of it. Partial patient updates are merged inside the store.
//! - Patient records are never physically removed; [`PatientStore::soft_delete_patient`] only
//!   marks them. Prediction history stays readable after a soft delete.
//! - [`PatientStore::prediction_history`] is ordered by creation time, ties broken by insertion
//!   order.
//!
//! # Usage
//!
//! ```ignore
//! let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
//! let user = store.create_user(&UserCreateDBRequest { /* ... */ }).await?;
//! let found = store.get_user_by_identity(&user.identity).await?;
//! ```

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

use crate::db::errors::Result;
use crate::db::models::{
    patients::{PatientCreateDBRequest, PatientDBResponse, PatientUpdateDBRequest},
    predictions::{PredictionCreateDBRequest, PredictionDBResponse},
    users::{UserCreateDBRequest, UserDBResponse},
};
use crate::types::{PatientId, PredictionId, UserId};

/// Account persistence.
#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `UniqueViolation` when the identity is taken.
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse>;

    /// Create the account, or replace the hash and role of an existing one with this identity.
    async fn upsert_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse>;

    async fn get_user(&self, id: UserId) -> Result<Option<UserDBResponse>>;

    async fn get_user_by_identity(&self, identity: &str) -> Result<Option<UserDBResponse>>;

    /// A page of users ordered by creation time, plus the total count.
    async fn list_users(&self, skip: i64, limit: i64) -> Result<(Vec<UserDBResponse>, i64)>;

    /// Fails with `NotFound` for an unknown user.
    async fn update_password(&self, id: UserId, password_hash: &str) -> Result<UserDBResponse>;

    /// Returns false when no such user existed.
    async fn delete_user(&self, id: UserId) -> Result<bool>;
}

/// Patient record and prediction history persistence.
#[async_trait::async_trait]
pub trait PatientStore: Send + Sync {
    /// Fails with `Validation` on malformed fields and `UniqueViolation` on a reused medical
    /// record number.
    async fn create_patient(&self, request: &PatientCreateDBRequest) -> Result<PatientDBResponse>;

    /// Returns soft-deleted records too; check [`PatientDBResponse::is_deleted`].
    async fn get_patient(&self, id: PatientId) -> Result<Option<PatientDBResponse>>;

    /// A page of live records ordered by creation time, plus the total live count.
    async fn list_patients(&self, skip: i64, limit: i64) -> Result<(Vec<PatientDBResponse>, i64)>;

    /// Merge `update` into a live record. Fails with `NotFound` for unknown or deleted records.
    async fn update_patient(&self, id: PatientId, update: &PatientUpdateDBRequest) -> Result<PatientDBResponse>;

    /// Returns false when the record is unknown or already deleted.
    async fn soft_delete_patient(&self, id: PatientId) -> Result<bool>;

    /// Fails with `NotFound` unless the patient exists and is live.
    async fn append_prediction(&self, request: PredictionCreateDBRequest) -> Result<PredictionDBResponse>;

    /// Fails with `NotFound` for a patient that never existed.
    async fn prediction_history(&self, patient_id: PatientId) -> Result<Vec<PredictionDBResponse>>;

    async fn get_prediction(&self, id: PredictionId) -> Result<Option<PredictionDBResponse>>;
}

/// Everything the API needs from persistence.
#[async_trait::async_trait]
pub trait Store: UserStore + PatientStore {
    /// Release backend resources during shutdown.
    async fn close(&self) {}
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must share. Each backend's test module runs these against itself.

    use super::*;
    use crate::api::models::users::Role;
    use crate::db::errors::DbError;
    use crate::inference::{FeatureInput, RiskAssessment};
    use crate::test_utils::{sample_assessment, sample_features};
    use uuid::Uuid;

    fn user(identity: &str) -> UserCreateDBRequest {
        UserCreateDBRequest {
            id: Uuid::new_v4(),
            identity: identity.to_string(),
            password_hash: "$argon2id$fake".to_string(),
            role: Role::Clinician,
        }
    }

    fn patient(mrn: &str, created_by: UserId) -> PatientCreateDBRequest {
        PatientCreateDBRequest {
            id: Uuid::new_v4(),
            medical_record_number: mrn.to_string(),
            features: sample_features(),
            diagnosis_codes: vec!["I50.9".to_string()],
            vitals: None,
            readmitted: None,
            created_by,
        }
    }

    fn prediction(patient_id: PatientId, requested_by: UserId, assessment: RiskAssessment) -> PredictionCreateDBRequest {
        PredictionCreateDBRequest {
            id: Uuid::new_v4(),
            patient_id,
            requested_by,
            features: sample_features(),
            assessment,
            model_version: "1.0.0".to_string(),
        }
    }

    pub async fn users_round_trip(store: &dyn Store) {
        let created = store.create_user(&user("nurse1")).await.unwrap();
        assert_eq!(created.role, Role::Clinician);

        let by_identity = store.get_user_by_identity("nurse1").await.unwrap().unwrap();
        assert_eq!(by_identity.id, created.id);
        assert!(store.get_user_by_identity("nobody").await.unwrap().is_none());

        let duplicate = store.create_user(&user("nurse1")).await.unwrap_err();
        assert!(matches!(duplicate, DbError::UniqueViolation { .. }));

        let updated = store.update_password(created.id, "$argon2id$other").await.unwrap();
        assert_eq!(updated.password_hash, "$argon2id$other");
        assert!(matches!(
            store.update_password(Uuid::new_v4(), "x").await,
            Err(DbError::NotFound)
        ));

        store.create_user(&user("nurse2")).await.unwrap();
        let (page, total) = store.list_users(0, 1).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].identity, "nurse1");

        assert!(store.delete_user(created.id).await.unwrap());
        assert!(!store.delete_user(created.id).await.unwrap());
        assert!(store.get_user(created.id).await.unwrap().is_none());
    }

    pub async fn upsert_refreshes_existing_user(store: &dyn Store) {
        let first = store.upsert_user(&user("admin")).await.unwrap();
        let second = store
            .upsert_user(&UserCreateDBRequest {
                id: Uuid::new_v4(),
                identity: "admin".to_string(),
                password_hash: "$argon2id$new".to_string(),
                role: Role::Admin,
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.role, Role::Admin);
        assert_eq!(second.password_hash, "$argon2id$new");
    }

    pub async fn patients_lifecycle(store: &dyn Store) {
        let author = Uuid::new_v4();
        let created = store.create_patient(&patient("MRN-1", author)).await.unwrap();
        assert_eq!(created.created_by, author);
        assert!(!created.is_deleted());

        let duplicate = store.create_patient(&patient("MRN-1", author)).await.unwrap_err();
        assert!(matches!(duplicate, DbError::UniqueViolation { .. }));

        let invalid = store.create_patient(&patient("", author)).await.unwrap_err();
        assert!(matches!(invalid, DbError::Validation { .. }));

        let update = PatientUpdateDBRequest {
            features: Some(FeatureInput {
                days_in_hospital: Some(10),
                ..Default::default()
            }),
            ..Default::default()
        };
        let updated = store.update_patient(created.id, &update).await.unwrap();
        assert_eq!(updated.features.days_in_hospital, 10);
        assert_eq!(updated.features.age, created.features.age);

        let bad_update = PatientUpdateDBRequest {
            features: Some(FeatureInput {
                age: Some(500),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            store.update_patient(created.id, &bad_update).await,
            Err(DbError::Validation { .. })
        ));
        let unchanged = store.get_patient(created.id).await.unwrap().unwrap();
        assert_eq!(unchanged.features.age, created.features.age);

        store.create_patient(&patient("MRN-2", author)).await.unwrap();
        let (page, total) = store.list_patients(0, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page[0].medical_record_number, "MRN-1");

        assert!(store.soft_delete_patient(created.id).await.unwrap());
        assert!(!store.soft_delete_patient(created.id).await.unwrap());

        let deleted = store.get_patient(created.id).await.unwrap().unwrap();
        assert!(deleted.is_deleted());
        let (page, total) = store.list_patients(0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].medical_record_number, "MRN-2");

        assert!(matches!(store.update_patient(created.id, &update).await, Err(DbError::NotFound)));
        assert!(matches!(
            store.update_patient(Uuid::new_v4(), &update).await,
            Err(DbError::NotFound)
        ));
    }

    pub async fn history_is_ordered_and_survives_soft_delete(store: &dyn Store) {
        let author = Uuid::new_v4();
        let patient = store.create_patient(&patient("MRN-H", author)).await.unwrap();

        let mut ids = Vec::new();
        for score in [0.2, 0.5, 0.9] {
            let assessment = RiskAssessment {
                score,
                ..sample_assessment()
            };
            let stored = store.append_prediction(prediction(patient.id, author, assessment)).await.unwrap();
            assert_eq!(stored.patient_id, patient.id);
            ids.push(stored.id);
        }

        let history = store.prediction_history(patient.id).await.unwrap();
        assert_eq!(history.iter().map(|p| p.id).collect::<Vec<_>>(), ids);
        assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert_eq!(store.prediction_history(patient.id).await.unwrap(), history);

        let fetched = store.get_prediction(ids[1]).await.unwrap().unwrap();
        assert_eq!(fetched.score, 0.5);
        assert!(store.get_prediction(Uuid::new_v4()).await.unwrap().is_none());

        store.soft_delete_patient(patient.id).await.unwrap();
        assert_eq!(store.prediction_history(patient.id).await.unwrap().len(), 3);
        assert!(matches!(
            store.append_prediction(prediction(patient.id, author, sample_assessment())).await,
            Err(DbError::NotFound)
        ));

        assert!(matches!(
            store.prediction_history(Uuid::new_v4()).await,
            Err(DbError::NotFound)
        ));
    }

    pub async fn replayed_inserts_are_idempotent(store: &dyn Store) {
        let request = user("nurse1");
        let first = store.create_user(&request).await.unwrap();
        let replay = store.create_user(&request).await.unwrap();
        assert_eq!(first.id, replay.id);
        assert_eq!(store.list_users(0, 10).await.unwrap().1, 1);

        // Same id, different identity
        let reused = UserCreateDBRequest {
            identity: "nurse2".to_string(),
            ..request
        };
        assert!(matches!(
            store.create_user(&reused).await,
            Err(DbError::UniqueViolation { .. })
        ));

        let patient_request = patient("MRN-R", first.id);
        let created = store.create_patient(&patient_request).await.unwrap();
        assert_eq!(store.create_patient(&patient_request).await.unwrap().id, created.id);
        assert_eq!(store.list_patients(0, 10).await.unwrap().1, 1);

        let append = prediction(created.id, first.id, sample_assessment());
        let stored = store.append_prediction(append.clone()).await.unwrap();
        let replayed = store.append_prediction(append).await.unwrap();
        assert_eq!(stored.id, replayed.id);
        assert_eq!(store.prediction_history(created.id).await.unwrap().len(), 1);
    }
}
