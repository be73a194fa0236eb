//! Block decomposition complexity (BDM) and its growth rate, gamma.
//!
//! The lattice is cut into non-overlapping 4x4 blocks, each read as a 16-bit
//! pattern (bit `r * 4 + c`, cells past the lattice edge dead). Every distinct
//! pattern contributes its complexity estimate plus `log2` of its occurrence
//! count. Estimates come from a [`ComplexityCache`], which approximates the
//! coding-theorem table and can be overridden with exact values.

use crate::config::{MeasureConfig, MeasureError};
use crate::sample_generations;
use lifelike_core::{Lattice, Rule, run};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use thiserror::Error;
use tracing::info;

/// Side length of a decomposition block.
pub const BLOCK_SIZE: usize = 4;
/// Number of distinct 4x4 binary patterns.
pub const BLOCK_PATTERNS: usize = 1 << (BLOCK_SIZE * BLOCK_SIZE);

const MIN_COMPLEXITY: f64 = 1.0;
const MAX_COMPLEXITY: f64 = 16.0;

#[derive(Debug, Error)]
pub enum ComplexityTableError {
    #[error("failed to read complexity table: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse complexity table: {0}")]
    Json(#[from] serde_json::Error),
    #[error("complexity table key {0:?} is not a 16-bit block pattern")]
    InvalidKey(String),
}

/// Memoised complexity estimates, one slot per 4x4 pattern.
#[derive(Debug, Clone)]
pub struct ComplexityCache {
    slots: Vec<Option<f64>>,
}

impl Default for ComplexityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ComplexityCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![None; BLOCK_PATTERNS],
        }
    }

    /// Complexity of `block`, computing and caching the approximation on a miss.
    pub fn complexity(&mut self, block: u16) -> f64 {
        let slot = &mut self.slots[usize::from(block)];
        *slot.get_or_insert_with(|| approximate_complexity(block))
    }

    /// Clear the cache, then install exact values. Patterns not listed fall
    /// back to the approximation on first use. Returns the number installed.
    pub fn load_overrides<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = (u16, f64)>,
    {
        self.slots.fill(None);
        let mut installed = 0;
        for (block, value) in entries {
            self.slots[usize::from(block)] = Some(value);
            installed += 1;
        }
        info!(entries = installed, "loaded complexity overrides");
        installed
    }

    /// Load overrides from a JSON object mapping decimal pattern ids to values.
    pub fn load_json<R: Read>(&mut self, reader: R) -> Result<usize, ComplexityTableError> {
        let table: HashMap<String, f64> = serde_json::from_reader(reader)?;
        let entries = table
            .into_iter()
            .map(|(key, value)| {
                key.trim()
                    .parse::<u16>()
                    .map(|block| (block, value))
                    .map_err(|_| ComplexityTableError::InvalidKey(key))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.load_overrides(entries))
    }

    /// Every populated slot, keyed by pattern.
    #[must_use]
    pub fn export(&self) -> BTreeMap<u16, f64> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(block, value)| value.map(|v| (block as u16, v)))
            .collect()
    }

    /// Number of populated slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// Entropy, edge-transition and mirror-symmetry estimate for one pattern,
/// clamped to `[1, 16]`.
#[must_use]
pub fn approximate_complexity(block: u16) -> f64 {
    let bit = |index: usize| (block >> index) & 1;
    let ones = block.count_ones();
    if ones == 0 || ones == 16 {
        return MIN_COMPLEXITY;
    }

    let p1 = f64::from(ones) / 16.0;
    let p0 = 1.0 - p1;
    let entropy = -(p1 * p1.log2() + p0 * p0.log2());

    let mut transitions = 0u32;
    for r in 0..BLOCK_SIZE {
        for c in 0..BLOCK_SIZE {
            let idx = r * BLOCK_SIZE + c;
            if c + 1 < BLOCK_SIZE && bit(idx) != bit(idx + 1) {
                transitions += 1;
            }
            if r + 1 < BLOCK_SIZE && bit(idx) != bit(idx + BLOCK_SIZE) {
                transitions += 1;
            }
        }
    }

    let mut mirrored_left_right = true;
    let mut mirrored_top_bottom = true;
    for r in 0..BLOCK_SIZE {
        for c in 0..BLOCK_SIZE / 2 {
            let far = BLOCK_SIZE - 1 - c;
            if bit(r * BLOCK_SIZE + c) != bit(r * BLOCK_SIZE + far) {
                mirrored_left_right = false;
            }
            if bit(c * BLOCK_SIZE + r) != bit(far * BLOCK_SIZE + r) {
                mirrored_top_bottom = false;
            }
        }
    }

    let mut complexity = entropy * 4.0 + f64::from(transitions) * 0.3;
    if mirrored_left_right {
        complexity -= 1.0;
    }
    if mirrored_top_bottom {
        complexity -= 1.0;
    }
    complexity.clamp(MIN_COMPLEXITY, MAX_COMPLEXITY)
}

/// 16-bit pattern of the block whose top-left corner is `(row, col)`.
#[must_use]
pub fn block_pattern(lattice: &Lattice, row: usize, col: usize) -> u16 {
    let mut pattern = 0u16;
    for r in 0..BLOCK_SIZE {
        for c in 0..BLOCK_SIZE {
            if lattice.is_alive(row + r, col + c) {
                pattern |= 1u16 << (r * BLOCK_SIZE + c);
            }
        }
    }
    pattern
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BdmResult {
    pub bdm: f64,
    pub unique_blocks: usize,
    pub total_blocks: usize,
}

/// Block decomposition complexity of `lattice`.
pub fn compute_bdm(lattice: &Lattice, cache: &mut ComplexityCache) -> BdmResult {
    let block_rows = lattice.rows().div_ceil(BLOCK_SIZE);
    let block_cols = lattice.cols().div_ceil(BLOCK_SIZE);

    let mut counts: HashMap<u16, u32> = HashMap::new();
    for br in 0..block_rows {
        for bc in 0..block_cols {
            let pattern = block_pattern(lattice, br * BLOCK_SIZE, bc * BLOCK_SIZE);
            *counts.entry(pattern).or_insert(0) += 1;
        }
    }

    let bdm = counts
        .iter()
        .map(|(&pattern, &count)| cache.complexity(pattern) + f64::from(count).log2())
        .sum();

    BdmResult {
        bdm,
        unique_blocks: counts.len(),
        total_blocks: block_rows * block_cols,
    }
}

/// Complexity bits gained per 1000 generations. Zero steps yields zero.
#[must_use]
pub fn gamma(bdm_initial: f64, bdm_final: f64, steps: u32) -> f64 {
    if steps == 0 {
        0.0
    } else {
        (bdm_final - bdm_initial) / f64::from(steps) * 1000.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GammaResult {
    pub seed: u64,
    pub steps: u32,
    pub gamma: f64,
    pub initial: BdmResult,
    pub final_state: BdmResult,
}

/// Gamma over a plain `config.steps` run from a lattice seeded with `seed`.
pub fn measure_gamma(
    rule: &Rule,
    config: &MeasureConfig,
    seed: u64,
    cache: &mut ComplexityCache,
) -> Result<GammaResult, MeasureError> {
    config.validate()?;
    let lattice = Lattice::random(config.rows, config.cols, config.boundary, config.density, seed)?;
    let initial = compute_bdm(&lattice, cache);
    let final_state = compute_bdm(&run(&lattice, rule, config.steps), cache);
    Ok(GammaResult {
        seed,
        steps: config.steps,
        gamma: gamma(initial.bdm, final_state.bdm, config.steps),
        initial,
        final_state,
    })
}

/// BDM sampled at each requested generation (0 means the input itself).
pub fn bdm_over_time(
    lattice: &Lattice,
    rule: &Rule,
    generations: &[u32],
    cache: &mut ComplexityCache,
) -> Vec<(u32, BdmResult)> {
    sample_generations(lattice, rule, generations, |state| compute_bdm(state, cache))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifelike_core::Boundary;

    #[test]
    fn uniform_blocks_are_minimal() {
        assert_eq!(approximate_complexity(0), 1.0);
        assert_eq!(approximate_complexity(u16::MAX), 1.0);
    }

    #[test]
    fn estimates_stay_in_range() {
        for block in 0..=u16::MAX {
            let value = approximate_complexity(block);
            assert!((1.0..=16.0).contains(&value), "block {block}: {value}");
        }
    }

    #[test]
    fn symmetric_halves_are_discounted() {
        // Left two columns alive: mirrored top-to-bottom only.
        let left_half = 0b0011_0011_0011_0011;
        // 8 ones: entropy 1, 4 transitions, one symmetry discount.
        let expected = 4.0 + 4.0 * 0.3 - 1.0;
        assert!((approximate_complexity(left_half) - expected).abs() < 1e-12);

        // Checkerboard: both mirror symmetries fail, 24 transitions.
        let checker = 0b1010_0101_1010_0101;
        let expected = 4.0 + 24.0 * 0.3;
        assert!((approximate_complexity(checker) - expected).abs() < 1e-12);
    }

    #[test]
    fn edge_blocks_pad_with_dead_cells() {
        let lattice = Lattice::from_cells(5, 5, Boundary::Wrap, vec![1; 25]).expect("lattice");
        assert_eq!(block_pattern(&lattice, 0, 0), u16::MAX);
        assert_eq!(block_pattern(&lattice, 4, 4), 1);
        assert_eq!(block_pattern(&lattice, 0, 4), 0b0001_0001_0001_0001);
    }

    #[test]
    fn uniform_lattices_score_below_random() {
        let mut cache = ComplexityCache::new();
        let dead = Lattice::new(64, 64, Boundary::Wrap).expect("lattice");
        let alive = Lattice::from_cells(64, 64, Boundary::Wrap, vec![1; 64 * 64]).expect("lattice");
        let random = Lattice::random(64, 64, Boundary::Wrap, 0.3, 42).expect("lattice");

        let dead_bdm = compute_bdm(&dead, &mut cache);
        let alive_bdm = compute_bdm(&alive, &mut cache);
        let random_bdm = compute_bdm(&random, &mut cache);

        assert_eq!(dead_bdm.unique_blocks, 1);
        assert_eq!(dead_bdm.total_blocks, 256);
        assert!((dead_bdm.bdm - 9.0).abs() < 1e-12, "1 + log2(256)");
        assert!((alive_bdm.bdm - 9.0).abs() < 1e-12);
        assert!(dead_bdm.bdm < random_bdm.bdm);
        assert!(alive_bdm.bdm < random_bdm.bdm);
    }

    #[test]
    fn overrides_replace_estimates() {
        let mut cache = ComplexityCache::new();
        assert!(cache.is_empty());
        cache.complexity(7);
        assert_eq!(cache.len(), 1);

        let installed = cache
            .load_json(r#"{"0": 2.5, "65535": 3.0}"#.as_bytes())
            .expect("table");
        assert_eq!(installed, 2);
        assert_eq!(cache.len(), 2, "loading clears earlier entries");
        assert_eq!(cache.complexity(0), 2.5);
        assert_eq!(cache.export().get(&65535), Some(&3.0));

        let err = cache.load_json(r#"{"70000": 1.0}"#.as_bytes());
        assert!(matches!(err, Err(ComplexityTableError::InvalidKey(_))));
    }

    #[test]
    fn gamma_scales_per_thousand_steps() {
        assert_eq!(gamma(10.0, 20.0, 1000), 10.0);
        assert_eq!(gamma(20.0, 10.0, 500), -20.0);
        assert_eq!(gamma(1.0, 2.0, 0), 0.0);
    }

    #[test]
    fn gamma_of_a_dying_rule_is_negative() {
        let config = MeasureConfig {
            rows: 32,
            cols: 32,
            steps: 10,
            ..MeasureConfig::default()
        };
        let mut cache = ComplexityCache::new();
        let rule = Rule::from_id(0).expect("rule");
        let result = measure_gamma(&rule, &config, 5, &mut cache).expect("gamma");
        assert!(result.gamma < 0.0);
        assert!((result.final_state.bdm - 7.0).abs() < 1e-12, "1 + log2(64)");
    }
}
