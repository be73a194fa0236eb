//! Dynamical measurements for Life-like rules and the per-rule survey protocol.

pub mod bdm;
pub mod config;
pub mod dimension;
pub mod lambda;

pub use bdm::{
    BLOCK_SIZE, BdmResult, ComplexityCache, ComplexityTableError, GammaResult,
    approximate_complexity, bdm_over_time, compute_bdm, gamma, measure_gamma,
};
pub use config::{MeasureConfig, MeasureError};
pub use dimension::{
    DimensionResult, Regression, ScalePoint, default_scales, dimension_over_time,
    linear_regression, measure_dimension, measure_dimension_at,
};
pub use lambda::{
    LambdaCurve, LambdaResult, LambdaTrial, lambda_from_distance, lambda_trial, mean_and_std_dev,
    measure_lambda, measure_lambda_detailed, measure_lambda_parallel,
};

use lifelike_core::{Lattice, MeasurementRecord, Rule, run_with_periodicity, step_into};
use std::time::Instant;
use tracing::debug;

/// Step `lattice` forward, applying `measure` at each requested generation.
///
/// Requested generations are visited in ascending order with duplicates
/// collapsed; generation 0 measures the input itself.
pub fn sample_generations<T>(
    lattice: &Lattice,
    rule: &Rule,
    generations: &[u32],
    mut measure: impl FnMut(&Lattice) -> T,
) -> Vec<(u32, T)> {
    let mut targets = generations.to_vec();
    targets.sort_unstable();
    targets.dedup();

    let mut samples = Vec::with_capacity(targets.len());
    let mut current = lattice.clone();
    let mut next = lattice.clone();
    let mut generation = 0u32;
    for target in targets {
        while generation < target {
            step_into(&current, &mut next, rule);
            std::mem::swap(&mut current, &mut next);
            generation += 1;
        }
        samples.push((target, measure(&current)));
    }
    samples
}

/// Measure one rule the way a survey worker does.
///
/// The initial lattice is seeded with `base_seed + rule_id`. It is classified
/// with a periodicity run, BDM is taken before and after that run, and the
/// dimension of the final state is fitted. Gamma is normalised by the
/// generations the run reached (`steps` when it stopped at generation 0).
/// Lambda trials use seeds offset by [`MeasureConfig::LAMBDA_SEED_OFFSET`].
pub fn measure_rule(
    rule_id: u32,
    config: &MeasureConfig,
    cache: &mut ComplexityCache,
) -> Result<MeasurementRecord, MeasureError> {
    let started = Instant::now();
    config.validate()?;
    let rule = Rule::from_id(rule_id)?;
    let seed = config.rule_seed(rule_id);

    let lattice = Lattice::random(config.rows, config.cols, config.boundary, config.density, seed)?;
    let bdm_initial = compute_bdm(&lattice, cache);

    let report = run_with_periodicity(
        &lattice,
        &rule,
        config.classification_steps,
        config.hash_window,
    );
    let bdm_final = compute_bdm(&report.lattice, cache);
    let fractal = measure_dimension(&report.lattice);

    let gamma_steps = if report.generations == 0 {
        config.steps
    } else {
        report.generations
    };
    let gamma = gamma(bdm_initial.bdm, bdm_final.bdm, gamma_steps);

    let lambda = measure_lambda(&rule, config, MeasureConfig::lambda_seed(seed))?;

    let record = MeasurementRecord {
        rule_id,
        birth_mask: rule.birth_mask(),
        survival_mask: rule.survival_mask(),
        rule_string: rule.to_string(),
        lambda: lambda.lambda,
        lambda_std_dev: lambda.std_dev,
        dimension: fractal.dimension,
        dimension_r_squared: fractal.r_squared,
        gamma,
        bdm_initial: bdm_initial.bdm,
        bdm_final: bdm_final.bdm,
        population_final: report.lattice.population() as u64,
        period: report.period,
        classification: report.classification,
        generations: report.generations,
        runtime_ms: started.elapsed().as_secs_f64() * 1000.0,
    };
    debug!(
        rule_id,
        rule = %record.rule_string,
        classification = %record.classification,
        lambda = record.lambda,
        runtime_ms = record.runtime_ms,
        "measured rule"
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifelike_core::{Boundary, Classification, LAMBDA_HEALED, RULE_COUNT};

    fn tiny_config() -> MeasureConfig {
        MeasureConfig {
            rows: 16,
            cols: 16,
            boundary: Boundary::Wrap,
            steps: 20,
            classification_steps: 200,
            hash_window: 100,
            density: 0.3,
            lambda_trials: 2,
            base_seed: 42,
        }
    }

    #[test]
    fn empty_rule_dies_and_heals() {
        let mut cache = ComplexityCache::new();
        let record = measure_rule(0, &tiny_config(), &mut cache).expect("measure");
        assert_eq!(record.rule_string, "B/S");
        assert_eq!(record.classification, Classification::Extinct);
        assert_eq!(record.period, Some(0));
        assert_eq!(record.generations, 1);
        assert_eq!(record.population_final, 0);
        assert_eq!(record.lambda, LAMBDA_HEALED);
        assert_eq!(record.dimension, 0.0);
        assert!(record.gamma < 0.0);
    }

    #[test]
    fn conway_record_is_reproducible() {
        let life = Rule::LIFE.id();
        let mut cache = ComplexityCache::new();
        let first = measure_rule(life, &tiny_config(), &mut cache).expect("measure");
        let second = measure_rule(life, &tiny_config(), &mut ComplexityCache::new()).expect("measure");
        assert_eq!(first.birth_mask, 8);
        assert_eq!(first.survival_mask, 12);
        assert_eq!(first.lambda, second.lambda);
        assert_eq!(first.dimension, second.dimension);
        assert_eq!(first.gamma, second.gamma);
        assert_eq!(first.classification, second.classification);
        assert_eq!(first.generations, second.generations);
        assert!(first.runtime_ms >= 0.0);
    }

    #[test]
    fn out_of_range_rule_is_an_error() {
        let mut cache = ComplexityCache::new();
        assert!(matches!(
            measure_rule(RULE_COUNT, &tiny_config(), &mut cache),
            Err(MeasureError::Rule(_))
        ));
    }

    #[test]
    fn sampling_steps_once_per_generation() {
        let lattice = Lattice::random(12, 12, Boundary::Wrap, 0.4, 3).expect("lattice");
        let samples = sample_generations(&lattice, &Rule::LIFE, &[3, 0, 3, 7], |state| {
            state.cells().to_vec()
        });
        let at: Vec<u32> = samples.iter().map(|(t, _)| *t).collect();
        assert_eq!(at, vec![0, 3, 7]);
        assert_eq!(samples[1].1, lifelike_core::run(&lattice, &Rule::LIFE, 3).cells());
        assert_eq!(samples[2].1, lifelike_core::run(&lattice, &Rule::LIFE, 7).cells());
    }
}
