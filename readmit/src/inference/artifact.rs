//! On-disk model artifact.
//!
//! The artifact is a JSON document produced by the training pipeline. It carries the
//! standardisation parameters and coefficients of a logistic model together with the risk band
//! thresholds that were calibrated for this model version.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::RiskBand;
use super::features::{CATEGORICAL_FEATURES, NUMERICAL_FEATURES};

/// Artifact layout understood by this build.
pub const SUPPORTED_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    LogisticRegression,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub model_version: String,
    pub model_type: ModelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<String>,
    pub intercept: f64,
    pub numerical: Vec<NumericalFeature>,
    pub categorical: Vec<CategoricalFeature>,
    pub risk_thresholds: RiskThresholds,
}

/// A standardised numeric input: `coefficient * (x - mean) / std`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct NumericalFeature {
    pub name: String,
    pub mean: f64,
    pub std: f64,
    pub coefficient: f64,
}

/// A one-hot encoded input; `levels` maps every known category to its coefficient.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CategoricalFeature {
    pub name: String,
    pub levels: BTreeMap<String, f64>,
}

/// Score cut-offs for the risk bands: `low` if score < `low`, `medium` if score < `medium`,
/// otherwise `high`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RiskThresholds {
    pub low: f64,
    pub medium: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self { low: 0.3, medium: 0.6 }
    }
}

impl RiskThresholds {
    pub fn band(&self, score: f64) -> RiskBand {
        if score < self.low {
            RiskBand::Low
        } else if score < self.medium {
            RiskBand::Medium
        } else {
            RiskBand::High
        }
    }
}

impl ModelArtifact {
    /// Structural checks run once at load time. Returns a human-readable reason on failure.
    pub fn check(&self, expected_version: &str) -> Result<(), String> {
        if self.format_version != SUPPORTED_FORMAT_VERSION {
            return Err(format!(
                "unsupported artifact format_version {} (expected {SUPPORTED_FORMAT_VERSION})",
                self.format_version
            ));
        }
        if self.model_version != expected_version {
            return Err(format!(
                "artifact model_version '{}' does not match configured version '{expected_version}'",
                self.model_version
            ));
        }
        if !self.intercept.is_finite() {
            return Err("intercept is not finite".to_string());
        }

        for name in NUMERICAL_FEATURES {
            let Some(feature) = self.numerical.iter().find(|f| f.name == name) else {
                return Err(format!("artifact does not define numerical feature '{name}'"));
            };
            if !(feature.std.is_finite() && feature.std > 0.0) {
                return Err(format!("feature '{name}' has non-positive std"));
            }
            if !(feature.mean.is_finite() && feature.coefficient.is_finite()) {
                return Err(format!("feature '{name}' has non-finite parameters"));
            }
        }
        for name in CATEGORICAL_FEATURES {
            let Some(feature) = self.categorical.iter().find(|f| f.name == name) else {
                return Err(format!("artifact does not define categorical feature '{name}'"));
            };
            if feature.levels.is_empty() {
                return Err(format!("categorical feature '{name}' has no levels"));
            }
            if feature.levels.values().any(|c| !c.is_finite()) {
                return Err(format!("categorical feature '{name}' has non-finite coefficients"));
            }
        }
        if let Some(extra) = self
            .numerical
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.categorical.iter().map(|f| f.name.as_str()))
            .find(|n| !NUMERICAL_FEATURES.contains(n) && !CATEGORICAL_FEATURES.contains(n))
        {
            return Err(format!("artifact defines unknown feature '{extra}'"));
        }

        let RiskThresholds { low, medium } = self.risk_thresholds;
        if !(0.0 < low && low < medium && medium < 1.0) {
            return Err(format!("risk thresholds must satisfy 0 < low < medium < 1 (got {low}, {medium})"));
        }
        Ok(())
    }
}
