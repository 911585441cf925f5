//! PostgreSQL store.
//!
//! Clinical features, vitals and prediction explanations are stored as JSONB documents next to
//! the relational columns the store filters and orders on. Every table carries a `seq
//! BIGSERIAL` column so that rows written in the same instant still have a stable order.
//!
//! All operations run through [`with_retry`], so pool timeouts and dropped connections are
//! retried with backoff before surfacing as [`DbError::Unavailable`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{
    FromRow, PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
    types::Json,
};
use tracing::{info, instrument};

use super::{PatientStore, Store, UserStore};
use crate::api::models::patients::Vitals;
use crate::config::{PoolSettings, RetryConfig};
use crate::db::errors::{DbError, Result};
use crate::db::models::{
    patients::{PatientCreateDBRequest, PatientDBResponse, PatientUpdateDBRequest},
    predictions::{PredictionCreateDBRequest, PredictionDBResponse},
    users::{UserCreateDBRequest, UserDBResponse},
};
use crate::db::retry::with_retry;
use crate::inference::{ContributingFactor, FeatureVector, Recommendations};
use crate::types::{PatientId, PredictionId, UserId, abbrev_uuid};

const USER_COLUMNS: &str = "id, identity, password_hash, role, created_at, updated_at";
const PATIENT_COLUMNS: &str =
    "id, medical_record_number, features, diagnosis_codes, vitals, readmitted, created_by, created_at, updated_at, deleted_at";
const PREDICTION_COLUMNS: &str = "id, patient_id, requested_by, features, score, band, confidence, contributing_factors, \
                                  recommendations, model_version, created_at";

/// A caller-chosen primary key that already belongs to a different record.
fn id_conflict(table: &str) -> DbError {
    DbError::UniqueViolation {
        constraint: Some(format!("{table}_pkey")),
        table: Some(table.to_string()),
        message: format!("id already used by another {table} row"),
    }
}

// Row shapes as stored, decoded into the store models below
#[derive(Debug, FromRow)]
struct PatientRow {
    id: PatientId,
    medical_record_number: String,
    features: Json<FeatureVector>,
    diagnosis_codes: Vec<String>,
    vitals: Option<Json<Vitals>>,
    readmitted: Option<bool>,
    created_by: UserId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<PatientRow> for PatientDBResponse {
    fn from(row: PatientRow) -> Self {
        Self {
            id: row.id,
            medical_record_number: row.medical_record_number,
            features: row.features.0,
            diagnosis_codes: row.diagnosis_codes,
            vitals: row.vitals.map(|v| v.0),
            readmitted: row.readmitted,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct PredictionRow {
    id: PredictionId,
    patient_id: PatientId,
    requested_by: UserId,
    features: Json<FeatureVector>,
    score: f64,
    band: String,
    confidence: f64,
    contributing_factors: Json<Vec<ContributingFactor>>,
    recommendations: Json<Recommendations>,
    model_version: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PredictionRow> for PredictionDBResponse {
    type Error = DbError;

    fn try_from(row: PredictionRow) -> Result<Self> {
        let band = row
            .band
            .parse()
            .map_err(|e: String| DbError::Other(anyhow::anyhow!("prediction {}: {e}", row.id)))?;
        Ok(Self {
            id: row.id,
            patient_id: row.patient_id,
            requested_by: row.requested_by,
            features: row.features.0,
            score: row.score,
            band,
            confidence: row.confidence,
            contributing_factors: row.contributing_factors.0,
            recommendations: row.recommendations.0,
            model_version: row.model_version,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    retry: RetryConfig,
}

impl PostgresStore {
    /// Connect, then apply pending migrations.
    #[instrument(skip_all, err)]
    pub async fn connect(
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
        pool: &PoolSettings,
        retry: RetryConfig,
    ) -> anyhow::Result<Self> {
        let mut options: PgConnectOptions = url.parse()?;
        if let Some(username) = username {
            options = options.username(username);
        }
        if let Some(password) = password {
            options = options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(pool.max_connections)
            .min_connections(pool.min_connections)
            .acquire_timeout(Duration::from_secs(pool.acquire_timeout_secs))
            .idle_timeout((pool.idle_timeout_secs > 0).then(|| Duration::from_secs(pool.idle_timeout_secs)))
            .max_lifetime((pool.max_lifetime_secs > 0).then(|| Duration::from_secs(pool.max_lifetime_secs)))
            .connect_with(options)
            .await?;

        crate::migrator().run(&pool).await?;
        info!("Connected to PostgreSQL and applied migrations");
        Ok(Self::from_pool(pool, retry))
    }

    pub fn from_pool(pool: PgPool, retry: RetryConfig) -> Self {
        Self { pool, retry }
    }

    async fn fetch_user(&self, sql: String, id_or_identity: UserLookup<'_>) -> Result<Option<UserDBResponse>> {
        with_retry(&self.retry, "fetch_user", || {
            let sql = sql.as_str();
            async move {
                let query = sqlx::query_as::<_, UserDBResponse>(sql);
                let query = match id_or_identity {
                    UserLookup::Id(id) => query.bind(id),
                    UserLookup::Identity(identity) => query.bind(identity),
                };
                Ok(query.fetch_optional(&self.pool).await?)
            }
        })
        .await
    }
}

#[derive(Clone, Copy)]
enum UserLookup<'a> {
    Id(UserId),
    Identity(&'a str),
}

#[async_trait::async_trait]
impl UserStore for PostgresStore {
    #[instrument(skip(self, request), fields(identity = %request.identity), err)]
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let sql = format!(
            "INSERT INTO users (id, identity, password_hash, role) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO NOTHING
             RETURNING {USER_COLUMNS}"
        );
        let select = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        with_retry(&self.retry, "create_user", || async {
            let inserted = sqlx::query_as::<_, UserDBResponse>(&sql)
                .bind(request.id)
                .bind(&request.identity)
                .bind(&request.password_hash)
                .bind(request.role)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(user) = inserted {
                return Ok(user);
            }

            // The id already exists: either an earlier attempt committed, or the id was reused
            let existing = sqlx::query_as::<_, UserDBResponse>(&select)
                .bind(request.id)
                .fetch_one(&self.pool)
                .await?;
            if existing.identity == request.identity {
                Ok(existing)
            } else {
                Err(id_conflict("users"))
            }
        })
        .await
    }

    #[instrument(skip(self, request), fields(identity = %request.identity), err)]
    async fn upsert_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let sql = format!(
            "INSERT INTO users (id, identity, password_hash, role) VALUES ($1, $2, $3, $4)
             ON CONFLICT (identity) DO UPDATE
                SET password_hash = EXCLUDED.password_hash, role = EXCLUDED.role, updated_at = now()
             RETURNING {USER_COLUMNS}"
        );
        with_retry(&self.retry, "upsert_user", || async {
            Ok(sqlx::query_as::<_, UserDBResponse>(&sql)
                .bind(request.id)
                .bind(&request.identity)
                .bind(&request.password_hash)
                .bind(request.role)
                .fetch_one(&self.pool)
                .await?)
        })
        .await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        self.fetch_user(format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"), UserLookup::Id(id))
            .await
    }

    async fn get_user_by_identity(&self, identity: &str) -> Result<Option<UserDBResponse>> {
        self.fetch_user(
            format!("SELECT {USER_COLUMNS} FROM users WHERE identity = $1"),
            UserLookup::Identity(identity),
        )
        .await
    }

    async fn list_users(&self, skip: i64, limit: i64) -> Result<(Vec<UserDBResponse>, i64)> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY seq LIMIT $1 OFFSET $2");
        with_retry(&self.retry, "list_users", || async {
            let users = sqlx::query_as::<_, UserDBResponse>(&sql)
                .bind(limit)
                .bind(skip)
                .fetch_all(&self.pool)
                .await?;
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users").fetch_one(&self.pool).await?;
            Ok((users, total))
        })
        .await
    }

    #[instrument(skip(self, password_hash), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn update_password(&self, id: UserId, password_hash: &str) -> Result<UserDBResponse> {
        let sql = format!("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}");
        with_retry(&self.retry, "update_password", || async {
            sqlx::query_as::<_, UserDBResponse>(&sql)
                .bind(id)
                .bind(password_hash)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(DbError::NotFound)
        })
        .await
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn delete_user(&self, id: UserId) -> Result<bool> {
        with_retry(&self.retry, "delete_user", || async {
            let result = sqlx::query("DELETE FROM users WHERE id = $1").bind(id).execute(&self.pool).await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }
}

#[async_trait::async_trait]
impl PatientStore for PostgresStore {
    #[instrument(skip(self, request), fields(mrn = %request.medical_record_number), err)]
    async fn create_patient(&self, request: &PatientCreateDBRequest) -> Result<PatientDBResponse> {
        request.validate()?;
        let sql = format!(
            "INSERT INTO patients (id, medical_record_number, features, diagnosis_codes, vitals, readmitted, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO NOTHING
             RETURNING {PATIENT_COLUMNS}"
        );
        let select = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = $1");
        with_retry(&self.retry, "create_patient", || async {
            let inserted = sqlx::query_as::<_, PatientRow>(&sql)
                .bind(request.id)
                .bind(&request.medical_record_number)
                .bind(Json(&request.features))
                .bind(&request.diagnosis_codes)
                .bind(request.vitals.as_ref().map(Json))
                .bind(request.readmitted)
                .bind(request.created_by)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = inserted {
                return Ok(row.into());
            }

            let existing = sqlx::query_as::<_, PatientRow>(&select)
                .bind(request.id)
                .fetch_one(&self.pool)
                .await?;
            if existing.medical_record_number == request.medical_record_number {
                Ok(existing.into())
            } else {
                Err(id_conflict("patients"))
            }
        })
        .await
    }

    async fn get_patient(&self, id: PatientId) -> Result<Option<PatientDBResponse>> {
        let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = $1");
        with_retry(&self.retry, "get_patient", || async {
            let row = sqlx::query_as::<_, PatientRow>(&sql).bind(id).fetch_optional(&self.pool).await?;
            Ok(row.map(Into::into))
        })
        .await
    }

    async fn list_patients(&self, skip: i64, limit: i64) -> Result<(Vec<PatientDBResponse>, i64)> {
        let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE deleted_at IS NULL ORDER BY seq LIMIT $1 OFFSET $2");
        with_retry(&self.retry, "list_patients", || async {
            let rows = sqlx::query_as::<_, PatientRow>(&sql)
                .bind(limit)
                .bind(skip)
                .fetch_all(&self.pool)
                .await?;
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patients WHERE deleted_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
            Ok((rows.into_iter().map(Into::into).collect(), total))
        })
        .await
    }

    #[instrument(skip(self, update), fields(patient_id = %abbrev_uuid(&id)), err)]
    async fn update_patient(&self, id: PatientId, update: &PatientUpdateDBRequest) -> Result<PatientDBResponse> {
        let select = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = $1 AND deleted_at IS NULL FOR UPDATE");
        let write = format!(
            "UPDATE patients
             SET features = $2, diagnosis_codes = $3, vitals = $4, readmitted = $5, updated_at = $6
             WHERE id = $1
             RETURNING {PATIENT_COLUMNS}"
        );
        with_retry(&self.retry, "update_patient", || async {
            // Row lock keeps the read-merge-write atomic against concurrent patches
            let mut tx = self.pool.begin().await?;
            let mut patient: PatientDBResponse = sqlx::query_as::<_, PatientRow>(&select)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(DbError::NotFound)?
                .into();

            patient.apply(update, Utc::now())?;

            let row = sqlx::query_as::<_, PatientRow>(&write)
                .bind(id)
                .bind(Json(&patient.features))
                .bind(&patient.diagnosis_codes)
                .bind(patient.vitals.as_ref().map(Json))
                .bind(patient.readmitted)
                .bind(patient.updated_at)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(row.into())
        })
        .await
    }

    #[instrument(skip(self), fields(patient_id = %abbrev_uuid(&id)), err)]
    async fn soft_delete_patient(&self, id: PatientId) -> Result<bool> {
        with_retry(&self.retry, "soft_delete_patient", || async {
            let result = sqlx::query("UPDATE patients SET deleted_at = now(), updated_at = now() WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    #[instrument(skip(self, request), fields(patient_id = %abbrev_uuid(&request.patient_id)), err)]
    async fn append_prediction(&self, request: PredictionCreateDBRequest) -> Result<PredictionDBResponse> {
        // Insert only while the patient is live, in a single statement
        let sql = format!(
            "INSERT INTO predictions
                (id, patient_id, requested_by, features, score, band, confidence, contributing_factors, recommendations, model_version)
             SELECT $1, p.id, $3, $4, $5, $6, $7, $8, $9, $10
             FROM patients p
             WHERE p.id = $2 AND p.deleted_at IS NULL
             ON CONFLICT (id) DO NOTHING
             RETURNING {PREDICTION_COLUMNS}"
        );
        let select = format!("SELECT {PREDICTION_COLUMNS} FROM predictions WHERE id = $1");
        let request = &request;
        with_retry(&self.retry, "append_prediction", || async {
            let assessment = &request.assessment;
            let inserted = sqlx::query_as::<_, PredictionRow>(&sql)
                .bind(request.id)
                .bind(request.patient_id)
                .bind(request.requested_by)
                .bind(Json(&request.features))
                .bind(assessment.score)
                .bind(assessment.band.as_str())
                .bind(assessment.confidence)
                .bind(Json(&assessment.contributing_factors))
                .bind(Json(&assessment.recommendations))
                .bind(&request.model_version)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = inserted {
                return row.try_into();
            }

            // Nothing inserted: the patient is gone, or an earlier attempt already committed this id
            let existing = sqlx::query_as::<_, PredictionRow>(&select)
                .bind(request.id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(DbError::NotFound)?;
            if existing.patient_id == request.patient_id {
                existing.try_into()
            } else {
                Err(id_conflict("predictions"))
            }
        })
        .await
    }

    async fn prediction_history(&self, patient_id: PatientId) -> Result<Vec<PredictionDBResponse>> {
        let sql = format!("SELECT {PREDICTION_COLUMNS} FROM predictions WHERE patient_id = $1 ORDER BY created_at, seq");
        with_retry(&self.retry, "prediction_history", || async {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM patients WHERE id = $1)")
                .bind(patient_id)
                .fetch_one(&self.pool)
                .await?;
            if !exists {
                return Err(DbError::NotFound);
            }
            let rows = sqlx::query_as::<_, PredictionRow>(&sql)
                .bind(patient_id)
                .fetch_all(&self.pool)
                .await?;
            rows.into_iter().map(TryInto::try_into).collect()
        })
        .await
    }

    async fn get_prediction(&self, id: PredictionId) -> Result<Option<PredictionDBResponse>> {
        let sql = format!("SELECT {PREDICTION_COLUMNS} FROM predictions WHERE id = $1");
        with_retry(&self.retry, "get_prediction", || async {
            sqlx::query_as::<_, PredictionRow>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .map(TryInto::try_into)
                .transpose()
        })
        .await
    }
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn close(&self) {
        self.pool.close().await;
    }
}
