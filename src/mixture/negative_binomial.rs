//! Gamma-Poisson (negative binomial) building blocks
//!
//! A cell with depth δ and latent rate λ ~ Gamma(shape a, scale θ) yields
//! y ~ Poisson(λδ). Integrating λ out gives a negative binomial with size a and
//! success probability 1 / (1 + θδ).

use std::cmp::Ordering;

use statrs::function::gamma::{digamma, ln_gamma};

/// Bounds kept on component shapes a = μ/θ
pub const MIN_SHAPE: f64 = 1e-8;
pub const MAX_SHAPE: f64 = 1e8;

/// Bounds kept on the shared scale θ
pub const MIN_SCALE: f64 = 1e-10;
pub const MAX_SCALE: f64 = 1e10;

/// Integer counts up to this size use exact finite sums for digamma differences
const EXACT_SUM_LIMIT: f64 = 64.0;

/// log P(y | a, θ, δ) under the Gamma-Poisson marginal
///
/// P(y) = Γ(y + a) / (Γ(a) y!) (1 / (1 + θδ))^a (θδ / (1 + θδ))^y
pub fn gamma_poisson_log_pmf(y: f64, shape: f64, scale: f64, depth: f64) -> f64 {
    if shape <= 0.0 || scale <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let l1p = (scale * depth).ln_1p();
    let mut lp = -shape * l1p;
    if y > 0.0 {
        if depth <= 0.0 {
            return f64::NEG_INFINITY;
        }
        lp += ln_gamma(y + shape) - ln_gamma(shape) - ln_gamma(y + 1.0)
            + y * ((scale * depth).ln() - l1p);
    }
    lp
}

fn is_small_integer(y: f64) -> bool {
    y == y.trunc() && y <= EXACT_SUM_LIMIT
}

/// ψ(y + a) − ψ(a)
pub fn digamma_diff(y: f64, a: f64) -> f64 {
    if y == 0.0 {
        return 0.0;
    }
    if is_small_integer(y) {
        (0..y as usize).map(|i| 1.0 / (a + i as f64)).sum()
    } else {
        digamma(y + a) - digamma(a)
    }
}

/// ψ'(y + a) − ψ'(a); always ≤ 0
pub fn trigamma_diff(y: f64, a: f64) -> f64 {
    if y == 0.0 {
        return 0.0;
    }
    if is_small_integer(y) {
        -(0..y as usize).map(|i| (a + i as f64).powi(-2)).sum::<f64>()
    } else {
        trigamma(y + a) - trigamma(a)
    }
}

/// Trigamma function ψ'(x) for x > 0
pub fn trigamma(x: f64) -> f64 {
    if x <= 0.0 {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    // Shift up with ψ'(x) = ψ'(x + 1) + 1/x² until the asymptotic series is accurate
    while x < 10.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    acc + inv
        + 0.5 * inv2
        + inv * inv2 * (1.0 / 6.0 - inv2 * (1.0 / 30.0 - inv2 * (1.0 / 42.0 - inv2 / 30.0)))
}

/// One gene's counts and depths, indexed for repeated likelihood evaluation.
///
/// Distinct count values are stored once so that Γ-function terms are evaluated per
/// value instead of per cell.
#[derive(Debug, Clone)]
pub struct GeneData {
    counts: Vec<f64>,
    depth: Vec<f64>,
    /// Position of each cell's count in `levels`
    level_of: Vec<usize>,
    /// Sorted distinct count values
    levels: Vec<f64>,
    /// ln(y!) per level
    ln_factorial: Vec<f64>,
}

impl GeneData {
    pub fn new(counts: Vec<f64>, depth: Vec<f64>) -> Self {
        debug_assert_eq!(counts.len(), depth.len());
        let mut levels = counts.clone();
        levels.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        levels.dedup();
        let level_of = counts
            .iter()
            .map(|y| {
                levels
                    .binary_search_by(|v| v.partial_cmp(y).unwrap_or(Ordering::Equal))
                    .unwrap_or(0)
            })
            .collect();
        let ln_factorial = levels.iter().map(|&y| ln_gamma(y + 1.0)).collect();
        Self {
            counts,
            depth,
            level_of,
            levels,
            ln_factorial,
        }
    }

    pub fn n_cells(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn depth(&self) -> &[f64] {
        &self.depth
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    pub fn level_of(&self, cell: usize) -> usize {
        self.level_of[cell]
    }

    pub fn ln_factorial(&self, level: usize) -> f64 {
        self.ln_factorial[level]
    }

    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Depth-adjusted counts y/δ of the cells with y > 0 and δ > 0
    pub fn positive_rates(&self) -> Vec<(f64, f64)> {
        self.counts
            .iter()
            .zip(&self.depth)
            .filter(|(&y, &d)| y > 0.0 && d > 0.0)
            .map(|(&y, &d)| (y / d, d))
            .collect()
    }
}
