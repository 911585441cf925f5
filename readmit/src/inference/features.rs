//! Feature schema for the readmission model.
//!
//! Requests carry a [`FeatureInput`] where every field is optional so that missing fields can be
//! reported together instead of failing on the first one. [`FeatureInput::validate`] turns it into
//! a [`FeatureVector`] whose numeric fields are known to lie inside their declared domain.
//! Categorical values are checked later against the levels the loaded model knows about.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ModelError;

/// Numerical features, in the order they are reported.
pub const NUMERICAL_FEATURES: [&str; 5] = ["age", "num_procedures", "days_in_hospital", "comorbidity_score", "prior_admissions"];

/// Categorical features, in the order they are reported.
pub const CATEGORICAL_FEATURES: [&str; 3] = ["gender", "primary_diagnosis", "discharge_to"];

/// Upper bound on patient age accepted by the model.
pub const MAX_AGE: i64 = 120;

/// Unvalidated feature set as submitted by a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct FeatureInput {
    /// Age in years (0-120)
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub primary_diagnosis: Option<String>,
    /// Procedures performed during the stay
    pub num_procedures: Option<i64>,
    /// Length of stay in days
    pub days_in_hospital: Option<i64>,
    /// Charlson-style comorbidity index
    pub comorbidity_score: Option<f64>,
    /// Discharge destination
    pub discharge_to: Option<String>,
    /// Admissions in the preceding twelve months (defaults to 0)
    pub prior_admissions: Option<i64>,
}

/// Validated feature set used for scoring and stored on patient records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct FeatureVector {
    pub age: i64,
    pub gender: String,
    pub primary_diagnosis: String,
    pub num_procedures: i64,
    pub days_in_hospital: i64,
    pub comorbidity_score: f64,
    pub discharge_to: String,
    pub prior_admissions: i64,
}

impl FeatureInput {
    /// Check presence and numeric domains, producing a [`FeatureVector`].
    pub fn validate(&self) -> Result<FeatureVector, ModelError> {
        let mut missing = Vec::new();
        if self.age.is_none() {
            missing.push("age");
        }
        if blank(&self.gender) {
            missing.push("gender");
        }
        if blank(&self.primary_diagnosis) {
            missing.push("primary_diagnosis");
        }
        if self.num_procedures.is_none() {
            missing.push("num_procedures");
        }
        if self.days_in_hospital.is_none() {
            missing.push("days_in_hospital");
        }
        if self.comorbidity_score.is_none() {
            missing.push("comorbidity_score");
        }
        if blank(&self.discharge_to) {
            missing.push("discharge_to");
        }
        if !missing.is_empty() {
            return Err(ModelError::InvalidFeatureVector(format!(
                "Missing required features: {}",
                missing.join(", ")
            )));
        }

        let features = FeatureVector {
            age: self.age.unwrap_or_default(),
            gender: self.gender.clone().unwrap_or_default().trim().to_string(),
            primary_diagnosis: self.primary_diagnosis.clone().unwrap_or_default().trim().to_string(),
            num_procedures: self.num_procedures.unwrap_or_default(),
            days_in_hospital: self.days_in_hospital.unwrap_or_default(),
            comorbidity_score: self.comorbidity_score.unwrap_or_default(),
            discharge_to: self.discharge_to.clone().unwrap_or_default().trim().to_string(),
            prior_admissions: self.prior_admissions.unwrap_or(0),
        };
        features.check_domain()?;
        Ok(features)
    }

    /// Overlay the fields set in `patch` on top of `self`.
    pub fn overlay(mut self, patch: &FeatureInput) -> Self {
        fn pick<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        }
        pick(&mut self.age, &patch.age);
        pick(&mut self.gender, &patch.gender);
        pick(&mut self.primary_diagnosis, &patch.primary_diagnosis);
        pick(&mut self.num_procedures, &patch.num_procedures);
        pick(&mut self.days_in_hospital, &patch.days_in_hospital);
        pick(&mut self.comorbidity_score, &patch.comorbidity_score);
        pick(&mut self.discharge_to, &patch.discharge_to);
        pick(&mut self.prior_admissions, &patch.prior_admissions);
        self
    }
}

impl FeatureInput {
    /// Value of a categorical feature by name, if supplied.
    pub fn categorical(&self, name: &str) -> Option<&str> {
        match name {
            "gender" => self.gender.as_deref(),
            "primary_diagnosis" => self.primary_diagnosis.as_deref(),
            "discharge_to" => self.discharge_to.as_deref(),
            _ => None,
        }
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

impl FeatureVector {
    /// Check numeric fields against their declared domains.
    pub fn check_domain(&self) -> Result<(), ModelError> {
        let invalid = |message: String| Err(ModelError::InvalidFeatureVector(message));

        if !(0..=MAX_AGE).contains(&self.age) {
            return invalid(format!("Age must be between 0 and {MAX_AGE}"));
        }
        if self.num_procedures < 0 {
            return invalid("Number of procedures cannot be negative".to_string());
        }
        if self.days_in_hospital < 0 {
            return invalid("Days in hospital cannot be negative".to_string());
        }
        if !self.comorbidity_score.is_finite() || self.comorbidity_score < 0.0 {
            return invalid("Comorbidity score must be a non-negative number".to_string());
        }
        if self.prior_admissions < 0 {
            return invalid("Prior admissions cannot be negative".to_string());
        }
        Ok(())
    }

    /// Value of a numerical feature by name.
    pub fn numerical(&self, name: &str) -> Option<f64> {
        match name {
            "age" => Some(self.age as f64),
            "num_procedures" => Some(self.num_procedures as f64),
            "days_in_hospital" => Some(self.days_in_hospital as f64),
            "comorbidity_score" => Some(self.comorbidity_score),
            "prior_admissions" => Some(self.prior_admissions as f64),
            _ => None,
        }
    }

    /// Value of a categorical feature by name.
    pub fn categorical(&self, name: &str) -> Option<&str> {
        match name {
            "gender" => Some(&self.gender),
            "primary_diagnosis" => Some(&self.primary_diagnosis),
            "discharge_to" => Some(&self.discharge_to),
            _ => None,
        }
    }
}

impl From<&FeatureVector> for FeatureInput {
    fn from(features: &FeatureVector) -> Self {
        Self {
            age: Some(features.age),
            gender: Some(features.gender.clone()),
            primary_diagnosis: Some(features.primary_diagnosis.clone()),
            num_procedures: Some(features.num_procedures),
            days_in_hospital: Some(features.days_in_hospital),
            comorbidity_score: Some(features.comorbidity_score),
            discharge_to: Some(features.discharge_to.clone()),
            prior_admissions: Some(features.prior_admissions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> FeatureInput {
        FeatureInput {
            age: Some(72),
            gender: Some("Female".to_string()),
            primary_diagnosis: Some("Heart Failure".to_string()),
            num_procedures: Some(2),
            days_in_hospital: Some(6),
            comorbidity_score: Some(3.5),
            discharge_to: Some("Home".to_string()),
            prior_admissions: None,
        }
    }

    #[test]
    fn test_validate_defaults_prior_admissions() {
        let features = complete().validate().unwrap();
        assert_eq!(features.prior_admissions, 0);
        assert_eq!(features.age, 72);
    }

    #[test]
    fn test_missing_fields_reported_together() {
        let input = FeatureInput {
            age: None,
            discharge_to: Some("   ".to_string()),
            ..complete()
        };
        let err = input.validate().unwrap_err();
        assert_eq!(err.to_string(), "Missing required features: age, discharge_to");
    }

    #[test]
    fn test_out_of_domain_values_rejected() {
        for input in [
            FeatureInput { age: Some(-1), ..complete() },
            FeatureInput { age: Some(121), ..complete() },
            FeatureInput {
                num_procedures: Some(-2),
                ..complete()
            },
            FeatureInput {
                days_in_hospital: Some(-1),
                ..complete()
            },
            FeatureInput {
                comorbidity_score: Some(f64::NAN),
                ..complete()
            },
            FeatureInput {
                prior_admissions: Some(-3),
                ..complete()
            },
        ] {
            assert!(
                matches!(input.validate(), Err(ModelError::InvalidFeatureVector(_))),
                "expected rejection for {input:?}"
            );
        }
    }

    #[test]
    fn test_overlay_only_replaces_set_fields() {
        let base = FeatureInput::from(&complete().validate().unwrap());
        let patch = FeatureInput {
            days_in_hospital: Some(11),
            ..Default::default()
        };
        let merged = base.overlay(&patch).validate().unwrap();
        assert_eq!(merged.days_in_hospital, 11);
        assert_eq!(merged.primary_diagnosis, "Heart Failure");
    }
}
