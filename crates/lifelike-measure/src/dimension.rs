//! Box-counting fractal dimension.

use crate::sample_generations;
use lifelike_core::{Lattice, Rule};
use serde::{Deserialize, Serialize};

/// Ordinary least-squares fit of `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

/// Occupied-box count at one box size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalePoint {
    pub scale: usize,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionResult {
    /// Negated slope of `ln N` against `ln scale`.
    pub dimension: f64,
    pub r_squared: f64,
    pub intercept: f64,
    /// Scales that produced a non-empty box count.
    pub points: Vec<ScalePoint>,
    /// Set when fewer than two usable scales existed; the fit is then zeroed.
    pub insufficient_data: bool,
}

impl DimensionResult {
    fn insufficient(points: Vec<ScalePoint>) -> Self {
        Self {
            dimension: 0.0,
            r_squared: 0.0,
            intercept: 0.0,
            points,
            insufficient_data: true,
        }
    }
}

/// Powers of two from 1 up to half the smaller dimension.
#[must_use]
pub fn default_scales(rows: usize, cols: usize) -> Vec<usize> {
    let limit = rows.min(cols) as f64 / 2.0;
    std::iter::successors(Some(1usize), |s| s.checked_mul(2))
        .take_while(|&s| s as f64 <= limit)
        .collect()
}

/// Boxes of side `scale` holding at least one live cell. Partial boxes at the
/// right and bottom edges count.
#[must_use]
pub fn count_occupied_boxes(lattice: &Lattice, scale: usize) -> usize {
    if scale == 0 {
        return 0;
    }
    let (rows, cols) = (lattice.rows(), lattice.cols());
    let box_rows = rows.div_ceil(scale);
    let box_cols = cols.div_ceil(scale);
    let cells = lattice.cells();

    let mut count = 0;
    for br in 0..box_rows {
        let row_range = br * scale..((br + 1) * scale).min(rows);
        for bc in 0..box_cols {
            let col_start = bc * scale;
            let col_end = ((bc + 1) * scale).min(cols);
            let occupied = row_range.clone().any(|r| {
                cells[r * cols + col_start..r * cols + col_end]
                    .iter()
                    .any(|&cell| cell > 0)
            });
            if occupied {
                count += 1;
            }
        }
    }
    count
}

/// Least-squares line through `(xs[i], ys[i])`.
///
/// A degenerate spread in `x` yields a zero slope and R²; R² is also zero
/// when `y` has no variance.
#[must_use]
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> Regression {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return Regression {
            slope: 0.0,
            intercept: 0.0,
            r_squared: 0.0,
        };
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let nf = n as f64;
    let mean_x = xs.iter().sum::<f64>() / nf;
    let mean_y = ys.iter().sum::<f64>() / nf;
    let sum_xy: f64 = xs.iter().zip(ys).map(|(x, y)| x * y).sum();
    let sum_x2: f64 = xs.iter().map(|x| x * x).sum();

    let denominator = sum_x2 - nf * mean_x * mean_x;
    if denominator.abs() < 1e-10 {
        return Regression {
            slope: 0.0,
            intercept: mean_y,
            r_squared: 0.0,
        };
    }

    let slope = (sum_xy - nf * mean_x * mean_y) / denominator;
    let intercept = mean_y - slope * mean_x;
    let ss_res: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
        .sum();
    let ss_tot: f64 = ys.iter().map(|y| (y - mean_y).powi(2)).sum();
    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

    Regression {
        slope,
        intercept,
        r_squared,
    }
}

/// Fractal dimension over [`default_scales`].
#[must_use]
pub fn measure_dimension(lattice: &Lattice) -> DimensionResult {
    measure_dimension_at(lattice, &default_scales(lattice.rows(), lattice.cols()))
}

/// Fractal dimension over caller-chosen box sizes. Zero sizes are ignored.
#[must_use]
pub fn measure_dimension_at(lattice: &Lattice, scales: &[usize]) -> DimensionResult {
    let points: Vec<ScalePoint> = scales
        .iter()
        .filter(|&&scale| scale > 0)
        .map(|&scale| ScalePoint {
            scale,
            count: count_occupied_boxes(lattice, scale),
        })
        .filter(|point| point.count > 0)
        .collect();

    if points.len() < 2 {
        return DimensionResult::insufficient(points);
    }

    let xs: Vec<f64> = points.iter().map(|p| (p.scale as f64).ln()).collect();
    let ys: Vec<f64> = points.iter().map(|p| (p.count as f64).ln()).collect();
    let fit = linear_regression(&xs, &ys);

    DimensionResult {
        dimension: -fit.slope,
        r_squared: fit.r_squared,
        intercept: fit.intercept,
        points,
        insufficient_data: false,
    }
}

/// Dimension sampled at each requested generation (0 means the input itself).
#[must_use]
pub fn dimension_over_time(
    lattice: &Lattice,
    rule: &Rule,
    generations: &[u32],
) -> Vec<(u32, DimensionResult)> {
    sample_generations(lattice, rule, generations, measure_dimension)
}
