//! Generation stepping, periodicity detection and lockstep runs.

use crate::lattice::{Boundary, Lattice, MAX_AGE};
use crate::rule::Rule;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Long-run behaviour observed by [`run_with_periodicity`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Every cell died.
    Extinct,
    /// Still life (period 1).
    Fixed,
    /// Cycle of period > 1.
    Periodic,
    /// No repeat seen inside the step budget and hash window.
    Aperiodic,
}

impl Classification {
    pub const ALL: [Classification; 4] = [
        Classification::Extinct,
        Classification::Fixed,
        Classification::Periodic,
        Classification::Aperiodic,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Classification::Extinct => "extinct",
            Classification::Fixed => "fixed",
            Classification::Periodic => "periodic",
            Classification::Aperiodic => "aperiodic",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Classification::ALL
            .into_iter()
            .find(|class| class.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown classification: {s:?}"))
    }
}

/// Outcome of a periodicity-aware run.
#[derive(Debug, Clone)]
pub struct PeriodicityReport {
    /// State at the generation the run stopped.
    pub lattice: Lattice,
    /// `Some(0)` when extinct, `Some(p)` for a detected cycle, `None` when aperiodic.
    pub period: Option<u32>,
    pub classification: Classification,
    /// Generation index at which the run stopped (the full budget when aperiodic).
    pub generations: u32,
}

/// Two lattices stepped in lockstep with their Hamming distance per generation.
#[derive(Debug, Clone)]
pub struct ParallelRun {
    pub first: Lattice,
    pub second: Lattice,
    /// `distances[t]` is the distance after `t` generations; length is `steps + 1`.
    pub distances: Vec<usize>,
}

impl ParallelRun {
    /// Distance after the last generation.
    #[must_use]
    pub fn final_distance(&self) -> usize {
        self.distances.last().copied().unwrap_or(0)
    }
}

#[inline]
fn neighbor_indices(index: usize, len: usize, wrap: bool) -> [Option<usize>; 3] {
    let prev = match index {
        0 if wrap => Some(len - 1),
        0 => None,
        _ => Some(index - 1),
    };
    let next = if index + 1 < len {
        Some(index + 1)
    } else if wrap {
        Some(0)
    } else {
        None
    };
    [prev, Some(index), next]
}

#[inline]
fn transition(rule: &Rule, state: u8, neighbors: u8) -> u8 {
    if state > 0 {
        if rule.should_survive(neighbors) {
            state.saturating_add(1).min(MAX_AGE)
        } else {
            0
        }
    } else if rule.should_birth(neighbors) {
        1
    } else {
        0
    }
}

/// Advance one generation into a fresh lattice.
#[must_use]
pub fn step(lattice: &Lattice, rule: &Rule) -> Lattice {
    let mut next = lattice.clone();
    step_into(lattice, &mut next, rule);
    next
}

/// Advance one generation, writing into `next`.
///
/// `next` is reshaped to match `current` if needed; callers double-buffer by
/// swapping the two after each call.
pub fn step_into(current: &Lattice, next: &mut Lattice, rule: &Rule) {
    next.reshape_like(current);
    let rows = current.rows();
    let cols = current.cols();
    let wrap = current.boundary() == Boundary::Wrap;
    let cells = current.cells();
    let out = next.cells_mut();

    let col_neighbors: Vec<[Option<usize>; 3]> = (0..cols)
        .map(|col| neighbor_indices(col, cols, wrap))
        .collect();

    for row in 0..rows {
        let row_neighbors = neighbor_indices(row, rows, wrap);
        for (col, cols_around) in col_neighbors.iter().enumerate() {
            let mut neighbors = 0u8;
            for (dr, r) in row_neighbors.iter().enumerate() {
                let Some(r) = *r else { continue };
                let base = r * cols;
                for (dc, c) in cols_around.iter().enumerate() {
                    if dr == 1 && dc == 1 {
                        continue;
                    }
                    if let Some(c) = *c
                        && cells[base + c] > 0
                    {
                        neighbors += 1;
                    }
                }
            }
            let idx = row * cols + col;
            out[idx] = transition(rule, cells[idx], neighbors);
        }
    }
}

/// Run `generations` steps with internal double buffering.
#[must_use]
pub fn run(lattice: &Lattice, rule: &Rule, generations: u32) -> Lattice {
    let mut current = lattice.clone();
    let mut next = lattice.clone();
    for _ in 0..generations {
        step_into(&current, &mut next, rule);
        std::mem::swap(&mut current, &mut next);
    }
    current
}

/// Sliding window of recently seen state hashes, oldest evicted first.
#[derive(Debug)]
struct HashWindow {
    capacity: usize,
    first_seen: HashMap<u32, u32>,
    order: VecDeque<u32>,
}

impl HashWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            first_seen: HashMap::with_capacity(capacity.min(4096) + 1),
            order: VecDeque::with_capacity(capacity.min(4096) + 1),
        }
    }

    /// Returns the generation `hash` was first seen at, or records it.
    fn observe(&mut self, hash: u32, generation: u32) -> Option<u32> {
        if let Some(&seen) = self.first_seen.get(&hash) {
            return Some(seen);
        }
        self.first_seen.insert(hash, generation);
        self.order.push_back(hash);
        if self.order.len() > self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.first_seen.remove(&oldest);
        }
        None
    }
}

/// Step until extinction, a repeated state hash, or `max_steps`.
///
/// Only the last `hash_window` generations are remembered, so cycles longer
/// than the window are reported as aperiodic.
#[must_use]
pub fn run_with_periodicity(
    lattice: &Lattice,
    rule: &Rule,
    max_steps: u32,
    hash_window: usize,
) -> PeriodicityReport {
    let mut current = lattice.clone();
    let mut next = lattice.clone();
    let mut window = HashWindow::new(hash_window);

    for generation in 0..max_steps {
        if current.is_empty() {
            return PeriodicityReport {
                lattice: current,
                period: Some(0),
                classification: Classification::Extinct,
                generations: generation,
            };
        }

        if let Some(seen) = window.observe(current.hash(), generation) {
            let period = generation - seen;
            let classification = if period == 1 {
                Classification::Fixed
            } else {
                Classification::Periodic
            };
            return PeriodicityReport {
                lattice: current,
                period: Some(period),
                classification,
                generations: generation,
            };
        }

        step_into(&current, &mut next, rule);
        std::mem::swap(&mut current, &mut next);
    }

    PeriodicityReport {
        lattice: current,
        period: None,
        classification: Classification::Aperiodic,
        generations: max_steps,
    }
}

/// Step two lattices under the same rule, recording the Hamming distance at
/// every generation including the initial one.
#[must_use]
pub fn run_parallel(first: &Lattice, second: &Lattice, rule: &Rule, steps: u32) -> ParallelRun {
    let mut a = first.clone();
    let mut b = second.clone();
    let mut a_next = first.clone();
    let mut b_next = second.clone();

    let mut distances = Vec::with_capacity(steps as usize + 1);
    distances.push(a.hamming_distance(&b));
    for _ in 0..steps {
        step_into(&a, &mut a_next, rule);
        step_into(&b, &mut b_next, rule);
        std::mem::swap(&mut a, &mut a_next);
        std::mem::swap(&mut b, &mut b_next);
        distances.push(a.hamming_distance(&b));
    }

    ParallelRun {
        first: a,
        second: b,
        distances,
    }
}
