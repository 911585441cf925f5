//! Contributing factors and care recommendations attached to each prediction.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{FeatureVector, RiskBand};

/// Number of factors reported per prediction.
pub const TOP_FACTORS: usize = 5;

/// Stays longer than this many days weigh more heavily.
const LONG_STAY_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ContributingFactor {
    pub feature: String,
    /// Share of the total contribution, in [0, 1]
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Recommendations {
    pub high_priority: Vec<String>,
    pub medium_priority: Vec<String>,
    pub low_priority: Vec<String>,
}

#[derive(Clone, Copy)]
enum Tier {
    High,
    Medium,
    Low,
}

/// Rank raw per-feature contributions into the top factors.
///
/// Comorbidity and primary diagnosis are up-weighted, as are stays longer than a week. Weights
/// are normalised to sum to one over all features before truncation.
pub fn contributing_factors(raw: &[(&str, f64)], features: &FeatureVector) -> Vec<ContributingFactor> {
    let weighted: Vec<(&str, f64)> = raw
        .iter()
        .map(|&(name, contribution)| {
            let multiplier = match name {
                "comorbidity_score" => 1.3,
                "days_in_hospital" if features.days_in_hospital > LONG_STAY_DAYS => 1.2,
                "primary_diagnosis" => 1.2,
                _ => 1.0,
            };
            (name, contribution.abs() * multiplier)
        })
        .collect();

    let total: f64 = weighted.iter().map(|(_, w)| w).sum();
    let mut factors: Vec<ContributingFactor> = weighted
        .into_iter()
        .map(|(name, w)| ContributingFactor {
            feature: name.to_string(),
            weight: if total > 0.0 { w / total } else { 0.0 },
        })
        .collect();

    // Stable sort keeps schema order among ties.
    factors.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    factors.truncate(TOP_FACTORS);
    factors
}

/// Build the recommendation lists for a band and its top factors.
pub fn recommendations(factors: &[ContributingFactor], band: RiskBand) -> Recommendations {
    let mut recs = Recommendations::default();

    for factor in factors {
        let tier = if factor.weight > 0.3 || band == RiskBand::High {
            Tier::High
        } else if factor.weight > 0.1 || band == RiskBand::Medium {
            Tier::Medium
        } else {
            Tier::Low
        };

        let target = match tier {
            Tier::High => &mut recs.high_priority,
            Tier::Medium => &mut recs.medium_priority,
            Tier::Low => &mut recs.low_priority,
        };
        for line in factor_advice(&factor.feature, tier) {
            let line = if band == RiskBand::High {
                format!("URGENT: {line}")
            } else {
                line.to_string()
            };
            if !target.contains(&line) {
                target.push(line);
            }
        }
    }

    let (target, general) = match band {
        RiskBand::High => (
            &mut recs.high_priority,
            [
                "Schedule immediate follow-up",
                "Review all medications",
                "Set up daily monitoring",
                "Arrange support at home",
                "Consider home care",
            ],
        ),
        RiskBand::Medium => (
            &mut recs.medium_priority,
            [
                "Follow-up within 2 weeks",
                "Review medications",
                "Keep health diary",
                "Know emergency contacts",
                "Learn warning signs",
            ],
        ),
        RiskBand::Low => (
            &mut recs.low_priority,
            [
                "Routine follow-up",
                "Continue medications",
                "Maintain healthy habits",
                "Regular exercise",
                "Balanced diet",
            ],
        ),
    };
    target.extend(general.iter().map(|s| s.to_string()));
    recs
}

fn factor_advice(feature: &str, tier: Tier) -> &'static [&'static str] {
    match (feature, tier) {
        ("comorbidity_score", Tier::High) => &[
            "Schedule comprehensive health assessment",
            "Review and adjust all medications",
            "Consider specialist consultations",
        ],
        ("comorbidity_score", Tier::Medium) => &[
            "Schedule follow-up for major conditions",
            "Review medication compliance",
            "Monitor symptoms regularly",
        ],
        ("comorbidity_score", Tier::Low) => &[
            "Maintain current treatment plans",
            "Regular check-ups as scheduled",
            "Report any new symptoms",
        ],
        ("days_in_hospital", Tier::High) => &[
            "Create detailed post-discharge plan",
            "Schedule 48-hour follow-up",
            "Arrange home health services",
        ],
        ("days_in_hospital", Tier::Medium) => &[
            "Schedule follow-up within 7 days",
            "Review discharge instructions",
            "Monitor recovery progress",
        ],
        ("days_in_hospital", Tier::Low) => &[
            "Follow discharge instructions",
            "Schedule routine follow-up",
            "Monitor for complications",
        ],
        ("primary_diagnosis", Tier::High) => &[
            "Urgent specialist consultation",
            "Review treatment effectiveness",
            "Consider additional testing",
        ],
        ("primary_diagnosis", Tier::Medium) => &[
            "Schedule specialist follow-up",
            "Monitor specific symptoms",
            "Review treatment plan",
        ],
        ("primary_diagnosis", Tier::Low) => &["Continue prescribed treatment", "Regular monitoring", "Routine check-ups"],
        ("num_procedures", Tier::High) => &[
            "Close monitoring of procedure sites",
            "Schedule post-procedure check-ups",
            "Watch for complications",
        ],
        ("num_procedures", Tier::Medium) => &[
            "Follow post-procedure care",
            "Regular wound care if needed",
            "Report unusual symptoms",
        ],
        ("num_procedures", Tier::Low) => &["Continue normal recovery", "Basic wound care", "Regular check-ups"],
        _ => &["Monitor and maintain current health management plan"],
    }
}
