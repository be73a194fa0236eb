//! Damage spreading: how far a single flipped cell propagates.
//!
//! Each trial fills two identical lattices from one seeded generator, flips
//! one randomly chosen cell in the second, runs both for `steps` generations
//! and reports `ln(h) / steps` for the final Hamming distance `h`. A trial
//! whose perturbation heals completely reports [`LAMBDA_HEALED`] instead of
//! `-inf`; callers aggregating lambda must special-case it.

use crate::config::{MeasureConfig, MeasureError};
use lifelike_core::{LAMBDA_HEALED, Lattice, Rule, run, run_parallel};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Outcome of one perturbation trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaTrial {
    pub seed: u64,
    pub lambda: f64,
    pub initial_distance: usize,
    pub final_distance: usize,
    /// `(row, col)` of the flipped cell.
    pub perturbation: (usize, usize),
}

/// Mean and population standard deviation over a set of trials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaResult {
    pub lambda: f64,
    pub std_dev: f64,
    pub trials: Vec<LambdaTrial>,
}

/// Single-seed run keeping the distance after every generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaCurve {
    pub seed: u64,
    pub lambda: f64,
    /// `distances[t]` is the Hamming distance after `t` generations.
    pub distances: Vec<usize>,
}

/// Lambda for a final distance after `steps` generations.
#[must_use]
pub fn lambda_from_distance(distance: usize, steps: u32) -> f64 {
    if distance == 0 || steps == 0 {
        LAMBDA_HEALED
    } else {
        (distance as f64).ln() / f64::from(steps)
    }
}

/// Arithmetic mean and population standard deviation. Empty input yields zeros.
#[must_use]
pub fn mean_and_std_dev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Build the original and perturbed lattices for one trial.
fn perturbed_pair(
    config: &MeasureConfig,
    seed: u64,
) -> Result<(Lattice, Lattice, (usize, usize)), MeasureError> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut original = Lattice::new(config.rows, config.cols, config.boundary)?;
    original.fill_random(&mut rng, config.density);
    let mut perturbed = original.clone();
    let row = rng.random_range(0..config.rows);
    let col = rng.random_range(0..config.cols);
    perturbed.flip_cell(row, col);
    Ok((original, perturbed, (row, col)))
}

/// Run one perturbation trial seeded with `seed`.
pub fn lambda_trial(
    rule: &Rule,
    config: &MeasureConfig,
    seed: u64,
) -> Result<LambdaTrial, MeasureError> {
    let (original, perturbed, perturbation) = perturbed_pair(config, seed)?;
    let initial_distance = original.hamming_distance(&perturbed);
    if initial_distance != 1 {
        warn!(seed, initial_distance, "perturbation did not change exactly one cell");
    }

    let final_distance = run(&original, rule, config.steps)
        .hamming_distance(&run(&perturbed, rule, config.steps));

    Ok(LambdaTrial {
        seed,
        lambda: lambda_from_distance(final_distance, config.steps),
        initial_distance,
        final_distance,
        perturbation,
    })
}

fn summarize(trials: Vec<LambdaTrial>) -> LambdaResult {
    let values: Vec<f64> = trials.iter().map(|trial| trial.lambda).collect();
    let (lambda, std_dev) = mean_and_std_dev(&values);
    LambdaResult {
        lambda,
        std_dev,
        trials,
    }
}

/// Run `config.lambda_trials` trials serially, trial `t` seeded with `base_seed + t`.
pub fn measure_lambda(
    rule: &Rule,
    config: &MeasureConfig,
    base_seed: u64,
) -> Result<LambdaResult, MeasureError> {
    config.validate()?;
    let trials = (0..config.lambda_trials)
        .map(|trial| lambda_trial(rule, config, base_seed.wrapping_add(u64::from(trial))))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(summarize(trials))
}

/// Same as [`measure_lambda`] with trials fanned out over the rayon pool.
/// Trials are seeded independently, so results match the serial version.
pub fn measure_lambda_parallel(
    rule: &Rule,
    config: &MeasureConfig,
    base_seed: u64,
) -> Result<LambdaResult, MeasureError> {
    config.validate()?;
    let trials = (0..config.lambda_trials)
        .into_par_iter()
        .map(|trial| lambda_trial(rule, config, base_seed.wrapping_add(u64::from(trial))))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(summarize(trials))
}

/// One trial recording the full distance curve.
pub fn measure_lambda_detailed(
    rule: &Rule,
    config: &MeasureConfig,
    seed: u64,
) -> Result<LambdaCurve, MeasureError> {
    config.validate()?;
    let (original, perturbed, _) = perturbed_pair(config, seed)?;
    let lockstep = run_parallel(&original, &perturbed, rule, config.steps);
    Ok(LambdaCurve {
        seed,
        lambda: lambda_from_distance(lockstep.final_distance(), config.steps),
        distances: lockstep.distances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifelike_core::Boundary;

    fn small_config() -> MeasureConfig {
        MeasureConfig {
            rows: 24,
            cols: 24,
            boundary: Boundary::Wrap,
            steps: 40,
            lambda_trials: 4,
            ..MeasureConfig::default()
        }
    }

    #[test]
    fn dying_rule_reports_the_healed_sentinel() {
        let rule = Rule::from_id(0).expect("rule");
        let result = measure_lambda(&rule, &small_config(), 9).expect("lambda");
        assert_eq!(result.lambda, LAMBDA_HEALED);
        assert_eq!(result.std_dev, 0.0);
        assert!(result.trials.iter().all(|t| t.final_distance == 0));
    }

    #[test]
    fn perturbation_starts_at_distance_one() {
        let trial = lambda_trial(&Rule::LIFE, &small_config(), 3).expect("trial");
        assert_eq!(trial.initial_distance, 1);
        let (row, col) = trial.perturbation;
        assert!(row < 24 && col < 24);
    }

    #[test]
    fn positive_distance_gives_log_rate() {
        assert!((lambda_from_distance(1, 10) - 0.0).abs() < 1e-12);
        let expected = 100f64.ln() / 50.0;
        assert!((lambda_from_distance(100, 50) - expected).abs() < 1e-12);
    }

    #[test]
    fn parallel_trials_match_serial() {
        let config = small_config();
        let serial = measure_lambda(&Rule::SEEDS, &config, 77).expect("serial");
        let parallel = measure_lambda_parallel(&Rule::SEEDS, &config, 77).expect("parallel");
        assert_eq!(serial, parallel);
        assert_eq!(serial.trials.len(), 4);
        let seeds: Vec<u64> = serial.trials.iter().map(|t| t.seed).collect();
        assert_eq!(seeds, vec![77, 78, 79, 80]);
    }

    #[test]
    fn detailed_curve_agrees_with_trial() {
        let config = small_config();
        let curve = measure_lambda_detailed(&Rule::HIGHLIFE, &config, 11).expect("curve");
        let trial = lambda_trial(&Rule::HIGHLIFE, &config, 11).expect("trial");
        assert_eq!(curve.distances.len(), 41);
        assert_eq!(curve.distances[0], 1);
        assert_eq!(curve.distances.last().copied(), Some(trial.final_distance));
        assert_eq!(curve.lambda, trial.lambda);
    }

    #[test]
    fn std_dev_is_population_form() {
        let (mean, std_dev) = mean_and_std_dev(&[1.0, 3.0]);
        assert_eq!(mean, 2.0);
        assert_eq!(std_dev, 1.0);
        assert_eq!(mean_and_std_dev(&[]), (0.0, 0.0));
    }
}
