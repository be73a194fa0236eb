//! Dense 2D lattice of cell ages with a boundary policy.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Age at which a surviving cell stops counting.
pub const MAX_AGE: u8 = u8::MAX;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Errors raised while constructing or combining lattices.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LatticeError {
    /// Rows or columns were zero.
    #[error("invalid lattice: {0}")]
    InvalidDimensions(&'static str),
    /// A cell buffer or peer lattice does not match this lattice's shape.
    #[error("cell buffer holds {actual} values, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    /// Boundary name was neither `wrap` nor `fixed`.
    #[error("unknown boundary policy: {0:?}")]
    UnknownBoundary(String),
}

/// How reads outside the lattice are resolved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// Toroidal: indices wrap modulo the dimensions.
    #[default]
    Wrap,
    /// Everything outside the lattice reads as dead.
    Fixed,
}

impl Boundary {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Boundary::Wrap => "wrap",
            Boundary::Fixed => "fixed",
        }
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Boundary {
    type Err = LatticeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wrap" | "torus" | "toroidal" => Ok(Boundary::Wrap),
            "fixed" | "dead" => Ok(Boundary::Fixed),
            _ => Err(LatticeError::UnknownBoundary(s.to_owned())),
        }
    }
}

/// Fixed-size grid of cell states. `0` is dead; `1..=255` is alive, the
/// value counting consecutive generations survived (saturating).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lattice {
    rows: usize,
    cols: usize,
    boundary: Boundary,
    cells: Vec<u8>,
}

impl Lattice {
    /// Construct an all-dead lattice.
    pub fn new(rows: usize, cols: usize, boundary: Boundary) -> Result<Self, LatticeError> {
        if rows == 0 || cols == 0 {
            return Err(LatticeError::InvalidDimensions(
                "rows and cols must be non-zero",
            ));
        }
        Ok(Self {
            rows,
            cols,
            boundary,
            cells: vec![0; rows * cols],
        })
    }

    /// Construct a lattice from a row-major cell buffer.
    pub fn from_cells(
        rows: usize,
        cols: usize,
        boundary: Boundary,
        cells: Vec<u8>,
    ) -> Result<Self, LatticeError> {
        let mut lattice = Self::new(rows, cols, boundary)?;
        if cells.len() != lattice.cells.len() {
            return Err(LatticeError::LengthMismatch {
                expected: lattice.cells.len(),
                actual: cells.len(),
            });
        }
        lattice.cells = cells;
        Ok(lattice)
    }

    /// Construct a lattice filled pseudo-randomly; see [`Lattice::randomize`].
    pub fn random(
        rows: usize,
        cols: usize,
        boundary: Boundary,
        density: f64,
        seed: u64,
    ) -> Result<Self, LatticeError> {
        let mut lattice = Self::new(rows, cols, boundary)?;
        lattice.randomize(density, seed);
        Ok(lattice)
    }

    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub const fn boundary(&self) -> Boundary {
        self.boundary
    }

    /// Total number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    pub(crate) fn cells_mut(&mut self) -> &mut [u8] {
        &mut self.cells
    }

    #[must_use]
    pub fn same_shape(&self, other: &Lattice) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }

    /// Resize and re-policy this lattice to match `other`, keeping the buffer allocation.
    pub(crate) fn reshape_like(&mut self, other: &Lattice) {
        self.rows = other.rows;
        self.cols = other.cols;
        self.boundary = other.boundary;
        self.cells.resize(other.cells.len(), 0);
    }

    #[inline]
    fn offset(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// Resolve signed coordinates to a flat index under the boundary policy.
    #[inline]
    fn resolve(&self, row: isize, col: isize) -> Option<usize> {
        match self.boundary {
            Boundary::Wrap => {
                let r = row.rem_euclid(self.rows as isize) as usize;
                let c = col.rem_euclid(self.cols as isize) as usize;
                Some(self.offset(r, c))
            }
            Boundary::Fixed => {
                if row < 0 || col < 0 || row as usize >= self.rows || col as usize >= self.cols {
                    None
                } else {
                    Some(self.offset(row as usize, col as usize))
                }
            }
        }
    }

    /// Read a cell. Out-of-range reads wrap or return dead depending on the boundary.
    #[must_use]
    pub fn get(&self, row: isize, col: isize) -> u8 {
        self.resolve(row, col).map_or(0, |idx| self.cells[idx])
    }

    /// Write a cell. Writes outside the lattice are ignored under either policy.
    pub fn set(&mut self, row: isize, col: isize, value: u8) {
        if row >= 0 && col >= 0 && (row as usize) < self.rows && (col as usize) < self.cols {
            let idx = self.offset(row as usize, col as usize);
            self.cells[idx] = value;
        }
    }

    /// Whether the in-bounds cell at `(row, col)` is alive.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols && self.cells[self.offset(row, col)] > 0
    }

    /// Number of live cells among the eight Moore neighbours.
    #[must_use]
    pub fn count_moore_neighbors(&self, row: usize, col: usize) -> u8 {
        let (row, col) = (row as isize, col as isize);
        let mut count = 0u8;
        for dr in -1..=1 {
            for dc in -1..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                if self.get(row + dr, col + dc) > 0 {
                    count += 1;
                }
            }
        }
        count
    }

    /// Refill every cell: alive (age 1) with probability `density`, else dead.
    /// The same seed always yields the same pattern.
    pub fn randomize(&mut self, density: f64, seed: u64) {
        let mut rng = SmallRng::seed_from_u64(seed);
        self.fill_random(&mut rng, density);
    }

    /// Refill every cell from an existing generator.
    pub fn fill_random<R: Rng>(&mut self, rng: &mut R, density: f64) {
        for cell in &mut self.cells {
            *cell = u8::from(rng.random::<f64>() < density);
        }
    }

    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    /// Toggle aliveness of an in-bounds cell; a live cell dies, a dead one is born with age 1.
    pub fn flip_cell(&mut self, row: usize, col: usize) {
        if row < self.rows && col < self.cols {
            let idx = self.offset(row, col);
            self.cells[idx] = if self.cells[idx] > 0 { 0 } else { 1 };
        }
    }

    /// Copy another lattice's cells into this one.
    pub fn copy_from(&mut self, other: &Lattice) -> Result<(), LatticeError> {
        if !self.same_shape(other) {
            return Err(LatticeError::LengthMismatch {
                expected: self.cells.len(),
                actual: other.cells.len(),
            });
        }
        self.cells.copy_from_slice(&other.cells);
        Ok(())
    }

    /// Count of positions whose aliveness differs. Ages are ignored.
    ///
    /// Lattices of different shape are compared over their common prefix,
    /// with every surplus cell counted as a difference.
    #[must_use]
    pub fn hamming_distance(&self, other: &Lattice) -> usize {
        let common = self
            .cells
            .iter()
            .zip(&other.cells)
            .filter(|&(&a, &b)| (a > 0) != (b > 0))
            .count();
        common + self.cells.len().abs_diff(other.cells.len())
    }

    #[must_use]
    pub fn population(&self) -> usize {
        self.cells.iter().filter(|&&cell| cell > 0).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|&cell| cell == 0)
    }

    /// FNV-1a over the row-major alive/dead bitmap. Used for cycle
    /// detection only.
    #[must_use]
    pub fn hash(&self) -> u32 {
        self.cells.iter().fold(FNV_OFFSET_BASIS, |hash, &cell| {
            (hash ^ u32::from(cell > 0)).wrapping_mul(FNV_PRIME)
        })
    }

    /// Alive/dead equality; ages are ignored.
    #[must_use]
    pub fn same_pattern(&self, other: &Lattice) -> bool {
        self.same_shape(other)
            && self
                .cells
                .iter()
                .zip(&other.cells)
                .all(|(&a, &b)| (a > 0) == (b > 0))
    }
}
