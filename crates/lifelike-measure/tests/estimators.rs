use lifelike_core::{Boundary, LAMBDA_HEALED, Lattice, Rule};
use lifelike_measure::{
    ComplexityCache, MeasureConfig, bdm_over_time, compute_bdm, measure_dimension, measure_lambda,
};

#[test]
fn default_sized_uniform_grids_are_simpler_than_noise() {
    let config = MeasureConfig::default();
    let mut cache = ComplexityCache::new();
    let dead = Lattice::new(config.rows, config.cols, config.boundary).expect("lattice");
    let alive = Lattice::from_cells(
        config.rows,
        config.cols,
        config.boundary,
        vec![1; config.rows * config.cols],
    )
    .expect("lattice");
    let noise = Lattice::random(
        config.rows,
        config.cols,
        config.boundary,
        config.density,
        config.base_seed,
    )
    .expect("lattice");

    let noise_bdm = compute_bdm(&noise, &mut cache).bdm;
    assert!(compute_bdm(&dead, &mut cache).bdm < noise_bdm);
    assert!(compute_bdm(&alive, &mut cache).bdm < noise_bdm);
}

#[test]
fn dense_noise_is_nearly_space_filling() {
    let noise = Lattice::random(256, 256, Boundary::Wrap, 0.9, 1).expect("lattice");
    let result = measure_dimension(&noise);
    assert!(!result.insufficient_data);
    assert!(result.dimension > 1.8 && result.dimension <= 2.0 + 1e-9);
}

#[test]
fn healed_trials_never_mix_with_real_exponents() {
    let config = MeasureConfig {
        rows: 32,
        cols: 32,
        steps: 50,
        lambda_trials: 3,
        ..MeasureConfig::default()
    };
    // B/S: every cell dies at once, so both copies are empty after one step.
    let rule = Rule::from_counts(&[], &[]).expect("rule");
    let result = measure_lambda(&rule, &config, 1234).expect("lambda");
    assert!(result.trials.iter().all(|t| t.lambda == LAMBDA_HEALED));
}

#[test]
fn bdm_collapses_once_a_rule_kills_everything() {
    let lattice = Lattice::random(32, 32, Boundary::Fixed, 0.3, 8).expect("lattice");
    let mut cache = ComplexityCache::new();
    let samples = bdm_over_time(&lattice, &Rule::from_id(0).expect("rule"), &[0, 1, 5], &mut cache);
    assert_eq!(samples.len(), 3);
    assert!(samples[0].1.bdm > samples[1].1.bdm);
    assert_eq!(samples[1].1, samples[2].1);
    assert_eq!(samples[1].1.unique_blocks, 1);
}
