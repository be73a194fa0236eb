use crate::rule::Rule;
use crate::stepper::Classification;
use serde::{Deserialize, Serialize};

/// Lambda reported when every perturbation healed completely.
pub const LAMBDA_HEALED: f64 = -10.0;

/// Everything measured for one rule in a survey run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub rule_id: u32,
    pub birth_mask: u16,
    pub survival_mask: u16,
    pub rule_string: String,
    /// Mean damage-spreading exponent over the lambda trials.
    pub lambda: f64,
    #[serde(default)]
    pub lambda_std_dev: f64,
    #[serde(rename = "D")]
    pub dimension: f64,
    #[serde(rename = "D_r_squared")]
    pub dimension_r_squared: f64,
    pub gamma: f64,
    pub bdm_initial: f64,
    pub bdm_final: f64,
    pub population_final: u64,
    pub period: Option<u32>,
    pub classification: Classification,
    pub generations: u32,
    pub runtime_ms: f64,
}

impl MeasurementRecord {
    /// A record carrying only the rule identity, zeroed measurements and
    /// an aperiodic classification.
    #[must_use]
    pub fn empty(rule: Rule) -> Self {
        Self {
            rule_id: rule.id(),
            birth_mask: rule.birth_mask(),
            survival_mask: rule.survival_mask(),
            rule_string: rule.to_string(),
            lambda: 0.0,
            lambda_std_dev: 0.0,
            dimension: 0.0,
            dimension_r_squared: 0.0,
            gamma: 0.0,
            bdm_initial: 0.0,
            bdm_final: 0.0,
            population_final: 0,
            period: None,
            classification: Classification::Aperiodic,
            generations: 0,
            runtime_ms: 0.0,
        }
    }

    /// The rule this record describes.
    #[must_use]
    pub fn rule(&self) -> Option<Rule> {
        Rule::from_masks(self.birth_mask, self.survival_mask).ok()
    }

    /// Whether lambda is the healed sentinel (or below it) rather than a
    /// measured exponent.
    #[must_use]
    pub fn lambda_is_sentinel(&self) -> bool {
        self.lambda <= LAMBDA_HEALED
    }
}
