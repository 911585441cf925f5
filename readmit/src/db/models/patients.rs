//! Store models for patient records.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::api::models::patients::{PatientCreate, PatientUpdate, Vitals};
use crate::db::errors::{DbError, Result};
use crate::inference::{FeatureInput, FeatureVector};
use crate::types::{PatientId, UserId};

const MAX_MRN_LENGTH: usize = 64;
const MAX_DIAGNOSIS_CODES: usize = 50;

/// Store request for creating a patient record
#[derive(Debug, Clone)]
pub struct PatientCreateDBRequest {
    /// Chosen by the caller; replaying an insert with the same id returns the existing row
    pub id: PatientId,
    pub medical_record_number: String,
    pub features: FeatureVector,
    pub diagnosis_codes: Vec<String>,
    pub vitals: Option<Vitals>,
    pub readmitted: Option<bool>,
    pub created_by: UserId,
}

impl PatientCreateDBRequest {
    /// Build from an API request whose features were already validated against the model.
    pub fn new(create: PatientCreate, features: FeatureVector, created_by: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            medical_record_number: create.medical_record_number.trim().to_string(),
            features,
            diagnosis_codes: normalize_codes(create.diagnosis_codes),
            vitals: create.vitals,
            readmitted: create.readmitted,
            created_by,
        }
    }

    /// Field checks applied by every store backend before a write.
    pub fn validate(&self) -> Result<()> {
        validate_mrn(&self.medical_record_number)?;
        validate_record(&self.features, &self.diagnosis_codes, self.vitals.as_ref())
    }
}

/// Store request for updating a patient record. `features` is a partial patch.
#[derive(Debug, Clone, Default)]
pub struct PatientUpdateDBRequest {
    pub features: Option<FeatureInput>,
    pub diagnosis_codes: Option<Vec<String>>,
    pub vitals: Option<Vitals>,
    pub readmitted: Option<bool>,
}

impl From<PatientUpdate> for PatientUpdateDBRequest {
    fn from(update: PatientUpdate) -> Self {
        Self {
            features: update.features,
            diagnosis_codes: update.diagnosis_codes,
            vitals: update.vitals,
            readmitted: update.readmitted,
        }
    }
}

/// Store response for a patient record
#[derive(Debug, Clone, PartialEq)]
pub struct PatientDBResponse {
    pub id: PatientId,
    pub medical_record_number: String,
    pub features: FeatureVector,
    pub diagnosis_codes: Vec<String>,
    pub vitals: Option<Vitals>,
    pub readmitted: Option<bool>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the record has been soft deleted
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PatientDBResponse {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Merge `update` into this record and re-check it. On error the record is left unchanged.
    pub fn apply(&mut self, update: &PatientUpdateDBRequest, now: DateTime<Utc>) -> Result<()> {
        let features = match &update.features {
            Some(patch) => FeatureInput::from(&self.features)
                .overlay(patch)
                .validate()
                .map_err(|e| DbError::Validation { message: e.to_string() })?,
            None => self.features.clone(),
        };
        let diagnosis_codes = match &update.diagnosis_codes {
            Some(codes) => normalize_codes(codes.clone()),
            None => self.diagnosis_codes.clone(),
        };
        let vitals = update.vitals.clone().or_else(|| self.vitals.clone());
        validate_record(&features, &diagnosis_codes, vitals.as_ref())?;

        self.features = features;
        self.diagnosis_codes = diagnosis_codes;
        self.vitals = vitals;
        if update.readmitted.is_some() {
            self.readmitted = update.readmitted;
        }
        self.updated_at = now;
        Ok(())
    }
}

fn normalize_codes(codes: Vec<String>) -> Vec<String> {
    codes.into_iter().map(|c| c.trim().to_ascii_uppercase()).collect()
}

fn invalid<T>(message: impl Into<String>) -> Result<T> {
    Err(DbError::Validation { message: message.into() })
}

fn validate_mrn(mrn: &str) -> Result<()> {
    if mrn.is_empty() {
        return invalid("Medical record number is required");
    }
    if mrn.len() > MAX_MRN_LENGTH {
        return invalid(format!("Medical record number must be at most {MAX_MRN_LENGTH} characters"));
    }
    if !mrn.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return invalid("Medical record number may only contain letters, digits and '-'");
    }
    Ok(())
}

fn validate_record(features: &FeatureVector, diagnosis_codes: &[String], vitals: Option<&Vitals>) -> Result<()> {
    features
        .check_domain()
        .map_err(|e| DbError::Validation { message: e.to_string() })?;

    if diagnosis_codes.len() > MAX_DIAGNOSIS_CODES {
        return invalid(format!("At most {MAX_DIAGNOSIS_CODES} diagnosis codes are allowed"));
    }
    for code in diagnosis_codes {
        // ICD-10 shape: a letter, then 2-7 letters, digits or dots
        let well_formed = (3..=8).contains(&code.len())
            && code.starts_with(|c: char| c.is_ascii_uppercase())
            && code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.');
        if !well_formed {
            return invalid(format!("Invalid diagnosis code '{code}'"));
        }
    }

    if let Some(vitals) = vitals {
        check_range("heart_rate", vitals.heart_rate.map(f64::from), 20.0, 250.0)?;
        check_range("systolic_bp", vitals.systolic_bp.map(f64::from), 50.0, 260.0)?;
        check_range("diastolic_bp", vitals.diastolic_bp.map(f64::from), 20.0, 160.0)?;
        check_range("temperature_celsius", vitals.temperature_celsius, 30.0, 45.0)?;
        check_range("respiratory_rate", vitals.respiratory_rate.map(f64::from), 4.0, 60.0)?;
        check_range("oxygen_saturation", vitals.oxygen_saturation, 0.0, 100.0)?;
    }
    Ok(())
}

fn check_range(name: &str, value: Option<f64>, min: f64, max: f64) -> Result<()> {
    match value {
        Some(v) if !(min..=max).contains(&v) => invalid(format!("{name} must be between {min} and {max}")),
        _ => Ok(()),
    }
}
