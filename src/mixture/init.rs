//! Mixture order selection and starting values

use super::negative_binomial::{GeneData, MAX_SHAPE, MIN_SCALE, MIN_SHAPE};
use super::MixtureModel;
use crate::error::{DinoError, Result};
use crate::stats::{mean_variance, quantile_sorted};

/// Lower bound on the starting dispersion, relative to the mean positive rate
const MIN_INIT_DISPERSION: f64 = 1e-3;

/// K = round(sqrt(number of non-zero counts)), within [1, max_components]
pub fn select_order(nonzero: usize, max_components: usize) -> usize {
    let k = (nonzero as f64).sqrt().round() as usize;
    k.clamp(1, max_components.max(1))
}

/// Starting mixture for a gene.
///
/// Component means sit at evenly spaced quantiles of the depth-adjusted positive counts,
/// weights are uniform, and the dispersion is the excess-over-Poisson dispersion of
/// those counts split across the K components.
pub fn initialize(data: &GeneData, k: usize) -> Result<MixtureModel> {
    let rates = data.positive_rates();
    if rates.is_empty() {
        return Err(DinoError::NumericalInstability {
            operation: "mixture initialization".to_string(),
            details: "no cells with positive count and depth".to_string(),
        });
    }

    let k = k.clamp(1, rates.len());
    let mut z: Vec<f64> = rates.iter().map(|&(r, _)| r).collect();
    z.sort_by(|a, b| a.total_cmp(b));

    let means: Vec<f64> = (0..k)
        .map(|c| quantile_sorted(&z, (c as f64 + 0.5) / k as f64))
        .collect();

    let (mean, var) = mean_variance(&z);
    let mean_inv_depth = rates.iter().map(|&(_, d)| 1.0 / d).sum::<f64>() / rates.len() as f64;
    // Var(y/δ) ≈ μθ + μ E[1/δ] for a single Gamma-Poisson component
    let excess = (var - mean * mean_inv_depth) / mean;
    let dispersion = (excess / k as f64)
        .max(MIN_INIT_DISPERSION * mean)
        .max(MIN_SCALE);

    if !dispersion.is_finite() || means.iter().any(|m| !m.is_finite() || *m <= 0.0) {
        return Err(DinoError::NumericalInstability {
            operation: "mixture initialization".to_string(),
            details: format!("non-finite starting values (dispersion {})", dispersion),
        });
    }

    let shapes = means
        .iter()
        .map(|&m| (m / dispersion).clamp(MIN_SHAPE, MAX_SHAPE))
        .collect();
    Ok(MixtureModel::from_shapes(vec![1.0 / k as f64; k], shapes, dispersion))
}
