//! Per-gene Gamma-Poisson mixture fitting
//!
//! Each gene's latent rate is modeled as a K-component mixture of Gammas with
//! component means μ_k and one dispersion (scale) θ shared by all components of the
//! gene. The mixture is fitted to the raw counts by accelerated EM.

mod accelerate;
mod em;
mod init;
mod negative_binomial;

pub use em::{e_step, fit_mixture, m_step, responsibilities, EStep};
pub use init::{initialize, select_order};
pub use negative_binomial::{gamma_poisson_log_pmf, trigamma, GeneData, MAX_SCALE, MAX_SHAPE, MIN_SCALE, MIN_SHAPE};

use serde::{Deserialize, Serialize};

/// Configurable parameters for the EM fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmParams {
    /// Maximum number of accelerated EM cycles
    pub max_iter: usize,
    /// Relative change in log-likelihood below which the fit is converged
    pub tol: f64,
    /// Use squared extrapolation between EM iterates
    pub accelerate: bool,
}

impl Default for EmParams {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: 1e-6,
            accelerate: true,
        }
    }
}

/// Mixture of Gammas on a gene's latent rate.
///
/// Components are stored by shape a_k = μ_k / θ so that the shared scale θ and the
/// shapes can be updated separately.
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureModel {
    weights: Vec<f64>,
    shapes: Vec<f64>,
    scale: f64,
}

impl MixtureModel {
    /// Build from mixture weights, component means, and the shared dispersion
    pub fn from_means(weights: Vec<f64>, means: &[f64], dispersion: f64) -> Self {
        let shapes = means.iter().map(|&m| m / dispersion).collect();
        Self::from_shapes(weights, shapes, dispersion)
    }

    pub(crate) fn from_shapes(weights: Vec<f64>, shapes: Vec<f64>, scale: f64) -> Self {
        debug_assert_eq!(weights.len(), shapes.len());
        Self { weights, shapes, scale }
    }

    /// Number of components K
    pub fn n_components(&self) -> usize {
        self.weights.len()
    }

    /// Mixture weights π_k
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Gamma shapes μ_k / θ
    pub fn shapes(&self) -> &[f64] {
        &self.shapes
    }

    /// Shared dispersion θ (the Gamma scale)
    pub fn dispersion(&self) -> f64 {
        self.scale
    }

    /// Component means μ_k
    pub fn means(&self) -> Vec<f64> {
        self.shapes.iter().map(|&a| a * self.scale).collect()
    }

    /// Mean of the latent rate, Σ π_k μ_k
    pub fn mean(&self) -> f64 {
        self.weights
            .iter()
            .zip(&self.shapes)
            .map(|(&w, &a)| w * a * self.scale)
            .sum()
    }

    /// Variance of the latent rate
    pub fn latent_variance(&self) -> f64 {
        let m = self.mean();
        let second: f64 = self
            .weights
            .iter()
            .zip(&self.shapes)
            .map(|(&w, &a)| {
                let mu = a * self.scale;
                w * (mu * self.scale + mu * mu)
            })
            .sum();
        second - m * m
    }

    /// Marginal log P(y) for a cell of the given depth
    pub fn log_pmf(&self, y: f64, depth: f64) -> f64 {
        let terms: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.shapes)
            .map(|(&w, &a)| w.ln() + gamma_poisson_log_pmf(y, a, self.scale, depth))
            .collect();
        crate::stats::log_sum_exp(&terms)
    }

    /// Weights sum to one, shapes and scale are positive and finite
    pub fn is_valid(&self) -> bool {
        let wsum: f64 = self.weights.iter().sum();
        !self.weights.is_empty()
            && (wsum - 1.0).abs() < 1e-8
            && self.weights.iter().all(|&w| w >= 0.0 && w.is_finite())
            && self.shapes.iter().all(|&a| a > 0.0 && a.is_finite())
            && self.scale > 0.0
            && self.scale.is_finite()
    }
}

/// Non-fatal events during a fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitNotice {
    /// Iteration cap reached before the tolerance was met; the last iterate is used
    NonConvergence { iterations: usize, relative_change: f64 },
    /// A component's weight collapsed or its mean became non-finite and it was removed
    DroppedComponent { mean: f64, weight: f64 },
}

/// Result of fitting one gene
#[derive(Debug, Clone)]
pub struct MixtureFit {
    pub model: MixtureModel,
    /// Observed-data log-likelihood of `model`
    pub log_likelihood: f64,
    /// Log-likelihood after initialization and after every EM cycle
    pub trace: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
    /// Components at initialization
    pub initial_components: usize,
    /// Cycles in which the extrapolated step was accepted
    pub accelerated_steps: usize,
    pub notices: Vec<FitNotice>,
}

impl MixtureFit {
    pub fn dropped_components(&self) -> usize {
        self.notices
            .iter()
            .filter(|n| matches!(n, FitNotice::DroppedComponent { .. }))
            .count()
    }
}
