//! Posterior resampling of latent expression
//!
//! Given a fitted mixture and its responsibilities, the latent rate of cell j is
//! drawn from the tempered posterior
//!
//!   Σ_k τ[k][j] Gamma(shape = a_k + γ y_j, rate = 1/θ + γ δ_j)
//!
//! where a_k = μ_k/θ. The posterior mean (a_k + γy)/(1/θ + γδ) tends to y/δ as γ grows.

use ndarray::{Array2, ArrayView1};
use rand::Rng;
use rand_distr::{Distribution, Gamma};

use crate::error::{DinoError, Result};
use crate::mixture::MixtureModel;

/// (shape, rate) of component `k`'s posterior for one cell
pub fn posterior_params(model: &MixtureModel, k: usize, count: f64, depth: f64, concentration: f64) -> (f64, f64) {
    let shape = model.shapes()[k] + concentration * count;
    let rate = 1.0 / model.dispersion() + concentration * depth;
    (shape, rate)
}

/// Draw a component index with probabilities `weights`.
///
/// The weights need not be normalized. Rounding error past the last cumulative sum
/// selects the last component with positive weight.
pub fn draw_component<R: Rng + ?Sized>(weights: ArrayView1<f64>, rng: &mut R) -> usize {
    let total: f64 = weights.sum();
    let u = rng.gen::<f64>() * total;
    let mut acc = 0.0;
    let mut last = 0;
    for (k, &w) in weights.iter().enumerate() {
        if w <= 0.0 {
            continue;
        }
        acc += w;
        last = k;
        if u < acc {
            return k;
        }
    }
    last
}

/// Draw one normalized value per cell.
///
/// `tau` holds components in rows and cells in columns. Cells with zero depth carry
/// no information on their rate and receive 0.
pub fn sample_posterior<R: Rng + ?Sized>(
    model: &MixtureModel,
    tau: &Array2<f64>,
    counts: &[f64],
    depth: &[f64],
    concentration: f64,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let n = counts.len();
    if depth.len() != n {
        return Err(DinoError::DimensionMismatch {
            expected: format!("{} depth values", n),
            got: format!("{} depth values", depth.len()),
        });
    }
    if tau.dim() != (model.n_components(), n) {
        return Err(DinoError::DimensionMismatch {
            expected: format!("{} x {} responsibilities", model.n_components(), n),
            got: format!("{} x {} responsibilities", tau.nrows(), tau.ncols()),
        });
    }

    let mut out = Vec::with_capacity(n);
    for j in 0..n {
        if depth[j] <= 0.0 {
            out.push(0.0);
            continue;
        }
        let k = draw_component(tau.column(j), rng);
        let (shape, rate) = posterior_params(model, k, counts[j], depth[j], concentration);
        let gamma = Gamma::new(shape, 1.0 / rate).map_err(|e| DinoError::NumericalInstability {
            operation: "posterior sampling".to_string(),
            details: format!("Gamma(shape {}, rate {}) for cell {}: {}", shape, rate, j, e),
        })?;
        out.push(gamma.sample(rng));
    }
    Ok(out)
}
