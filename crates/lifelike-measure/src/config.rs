use lifelike_core::{Boundary, LatticeError, RuleError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while configuring or running a measurement.
#[derive(Debug, Error)]
pub enum MeasureError {
    /// Indicates an invalid configuration value.
    #[error("invalid measurement configuration: {0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Lattice(#[from] LatticeError),
    #[error(transparent)]
    Rule(#[from] RuleError),
}

/// Lattice geometry, run lengths and seeding shared by every estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureConfig {
    pub rows: usize,
    pub cols: usize,
    pub boundary: Boundary,
    /// Generations per lambda trial and fallback gamma denominator.
    pub steps: u32,
    /// Step budget for the periodicity run.
    pub classification_steps: u32,
    /// Generations of state hashes remembered for cycle detection.
    pub hash_window: usize,
    /// Probability that a cell starts alive.
    pub density: f64,
    pub lambda_trials: u32,
    /// Added to the rule id to seed each rule's initial lattice.
    pub base_seed: u64,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            rows: 256,
            cols: 256,
            boundary: Boundary::Wrap,
            steps: 1000,
            classification_steps: 10_000,
            hash_window: 1000,
            density: 0.3,
            lambda_trials: 3,
            base_seed: 0,
        }
    }
}

impl MeasureConfig {
    /// Offset between a rule's seed and its first lambda trial seed.
    pub const LAMBDA_SEED_OFFSET: u64 = 1_000_000;

    pub fn validate(&self) -> Result<(), MeasureError> {
        if self.rows == 0 || self.cols == 0 {
            return Err(MeasureError::InvalidConfig(
                "lattice dimensions must be non-zero",
            ));
        }
        if self.steps == 0 {
            return Err(MeasureError::InvalidConfig("steps must be non-zero"));
        }
        if self.classification_steps == 0 {
            return Err(MeasureError::InvalidConfig(
                "classification_steps must be non-zero",
            ));
        }
        if self.hash_window == 0 {
            return Err(MeasureError::InvalidConfig("hash_window must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.density) {
            return Err(MeasureError::InvalidConfig(
                "density must be within [0, 1]",
            ));
        }
        if self.lambda_trials == 0 {
            return Err(MeasureError::InvalidConfig(
                "lambda_trials must be non-zero",
            ));
        }
        Ok(())
    }

    /// Seed for the initial lattice of `rule_id`.
    #[must_use]
    pub const fn rule_seed(&self, rule_id: u32) -> u64 {
        self.base_seed.wrapping_add(rule_id as u64)
    }

    /// Base seed for the lambda trials of a rule seeded with `rule_seed`.
    #[must_use]
    pub const fn lambda_seed(rule_seed: u64) -> u64 {
        rule_seed.wrapping_add(Self::LAMBDA_SEED_OFFSET)
    }
}
