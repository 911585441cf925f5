//! Readmission-risk inference.
//!
//! The [`InferenceEngine`] loads a single [`ModelArtifact`] at startup and shares it read-only
//! across all requests. Scoring is pure computation over the artifact: the same model and input
//! always give the same [`RiskAssessment`], so predictions need no locking and are never retried.
//!
//! ## Loading
//!
//! [`InferenceEngine::load`] reads the JSON artifact from disk and refuses to start if the file
//! is missing, malformed, or was produced for a different model version than the one configured.
//! A [`ModelError::LoadFailure`] is fatal for the process.
//!
//! ## Scoring
//!
//! The model is a logistic regression over standardised numerical features and one-hot encoded
//! categorical features. The resulting probability is banded with the thresholds stored in the
//! artifact (see [`RiskThresholds`]).

mod artifact;
mod explain;
pub mod features;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

pub use artifact::{CategoricalFeature, ModelArtifact, ModelType, NumericalFeature, RiskThresholds, SUPPORTED_FORMAT_VERSION};
pub use explain::{ContributingFactor, Recommendations, TOP_FACTORS};
pub use features::{FeatureInput, FeatureVector};

#[derive(Debug, Error)]
pub enum ModelError {
    /// The artifact could not be read or does not match the running configuration
    #[error("Failed to load model from {}: {reason}", path.display())]
    LoadFailure { path: PathBuf, reason: String },

    /// Input is missing fields, out of domain, or uses an unknown category
    #[error("{0}")]
    InvalidFeatureVector(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBand::Low => "low",
            RiskBand::Medium => "medium",
            RiskBand::High => "high",
        }
    }
}

impl std::fmt::Display for RiskBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskBand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskBand::Low),
            "medium" => Ok(RiskBand::Medium),
            "high" => Ok(RiskBand::High),
            other => Err(format!("unknown risk band '{other}'")),
        }
    }
}

/// Output of a single prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RiskAssessment {
    /// Readmission probability in [0, 1]
    pub score: f64,
    pub band: RiskBand,
    /// Distance of the score from the decision midpoint, in [0, 1]
    pub confidence: f64,
    pub contributing_factors: Vec<ContributingFactor>,
    pub recommendations: Recommendations,
}

/// Public description of the loaded model.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelInfo {
    pub model_version: String,
    pub model_type: ModelType,
    pub trained_at: Option<String>,
    pub risk_thresholds: RiskThresholds,
    pub numerical_features: Vec<String>,
    /// Accepted values for every categorical feature
    pub categorical_features: Vec<CategoricalLevels>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategoricalLevels {
    pub name: String,
    pub levels: Vec<String>,
}

/// Handle to the loaded model. Cloning is cheap and shares the artifact.
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    model: Arc<ModelArtifact>,
}

impl InferenceEngine {
    /// Read and check the artifact at `path`.
    #[instrument(skip_all, fields(path = %path.display(), expected_version = %expected_version))]
    pub fn load(path: &Path, expected_version: &str) -> Result<Self, ModelError> {
        let failure = |reason: String| ModelError::LoadFailure {
            path: path.to_path_buf(),
            reason,
        };

        let raw = std::fs::read_to_string(path).map_err(|e| failure(format!("cannot read file: {e}")))?;
        let artifact: ModelArtifact = serde_json::from_str(&raw).map_err(|e| failure(format!("malformed artifact: {e}")))?;
        let engine = Self::from_artifact(artifact, expected_version).map_err(|e| match e {
            ModelError::LoadFailure { reason, .. } => failure(reason),
            other => other,
        })?;

        info!(
            model_version = %engine.version(),
            low = engine.model.risk_thresholds.low,
            medium = engine.model.risk_thresholds.medium,
            "Loaded readmission model"
        );
        Ok(engine)
    }

    /// Wrap an in-memory artifact after the same checks [`load`](Self::load) performs.
    pub fn from_artifact(artifact: ModelArtifact, expected_version: &str) -> Result<Self, ModelError> {
        artifact.check(expected_version).map_err(|reason| ModelError::LoadFailure {
            path: PathBuf::from("<memory>"),
            reason,
        })?;
        Ok(Self { model: Arc::new(artifact) })
    }

    /// The model version tag recorded on every prediction.
    pub fn version(&self) -> &str {
        &self.model.model_version
    }

    pub fn thresholds(&self) -> RiskThresholds {
        self.model.risk_thresholds
    }

    /// Score a validated feature vector.
    pub fn predict(&self, features: &FeatureVector) -> Result<RiskAssessment, ModelError> {
        features.check_domain()?;
        let (score, raw) = self.score(features)?;
        let band = self.model.risk_thresholds.band(score);
        let contributing_factors = explain::contributing_factors(&raw, features);
        let recommendations = explain::recommendations(&contributing_factors, band);

        debug!(score, %band, "Scored feature vector");

        Ok(RiskAssessment {
            score,
            band,
            confidence: (2.0 * score - 1.0).abs(),
            contributing_factors,
            recommendations,
        })
    }

    /// Probability plus the absolute per-feature contributions to the logit.
    fn score<'a>(&'a self, features: &FeatureVector) -> Result<(f64, Vec<(&'a str, f64)>), ModelError> {
        let mut logit = self.model.intercept;
        let mut contributions = Vec::with_capacity(self.model.numerical.len() + self.model.categorical.len());

        for feature in &self.model.numerical {
            let value = features
                .numerical(&feature.name)
                .ok_or_else(|| ModelError::InvalidFeatureVector(format!("Unsupported feature '{}'", feature.name)))?;
            let term = feature.coefficient * (value - feature.mean) / feature.std;
            logit += term;
            contributions.push((feature.name.as_str(), term.abs()));
        }

        for feature in &self.model.categorical {
            let value = features
                .categorical(&feature.name)
                .ok_or_else(|| ModelError::InvalidFeatureVector(format!("Unsupported feature '{}'", feature.name)))?;
            let term = level_coefficient(feature, value)?;
            logit += term;
            contributions.push((feature.name.as_str(), term.abs()));
        }

        let probability = 1.0 / (1.0 + (-logit).exp());
        Ok((probability.clamp(0.0, 1.0), contributions))
    }

    /// Check the categorical values present in `input` against the model's levels.
    ///
    /// Absent fields are skipped, so this also applies to partial updates.
    pub fn check_categories(&self, input: &FeatureInput) -> Result<(), ModelError> {
        for feature in &self.model.categorical {
            if let Some(value) = input.categorical(&feature.name) {
                level_coefficient(feature, value.trim())?;
            }
        }
        Ok(())
    }

    pub fn describe(&self) -> ModelInfo {
        ModelInfo {
            model_version: self.model.model_version.clone(),
            model_type: self.model.model_type,
            trained_at: self.model.trained_at.clone(),
            risk_thresholds: self.model.risk_thresholds,
            numerical_features: self.model.numerical.iter().map(|f| f.name.clone()).collect(),
            categorical_features: self
                .model
                .categorical
                .iter()
                .map(|f| CategoricalLevels {
                    name: f.name.clone(),
                    levels: f.levels.keys().cloned().collect(),
                })
                .collect(),
        }
    }
}

fn level_coefficient(feature: &CategoricalFeature, value: &str) -> Result<f64, ModelError> {
    feature.levels.get(value).copied().ok_or_else(|| {
        let valid: Vec<&str> = feature.levels.keys().map(String::as_str).collect();
        ModelError::InvalidFeatureVector(format!(
            "Invalid {}: '{value}'. Valid values: {}",
            feature.name,
            valid.join(", ")
        ))
    })
}
