//! Squared extrapolation (SQUAREM) between EM iterates
//!
//! Iterates are mapped to an unconstrained vector (ln π, ln a, ln θ). Given x0 and two
//! EM images x1 = F(x0), x2 = F(x1), the extrapolated point is
//! x0 − 2αr + α²v with r = x1 − x0, v = x2 − 2x1 + x0 and α = −|r|/|v|.

use super::negative_binomial::{MAX_SCALE, MAX_SHAPE, MIN_SCALE, MIN_SHAPE};
use super::MixtureModel;

/// Steps longer than this are truncated; α = −1 reproduces x2
const MAX_STEP: f64 = 64.0;

fn to_vector(model: &MixtureModel) -> Vec<f64> {
    let mut v = Vec::with_capacity(2 * model.n_components() + 1);
    v.extend(model.weights().iter().map(|w| w.ln()));
    v.extend(model.shapes().iter().map(|a| a.ln()));
    v.push(model.dispersion().ln());
    v
}

fn from_vector(v: &[f64], k: usize) -> MixtureModel {
    let max_lw = v[..k].iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut weights: Vec<f64> = v[..k].iter().map(|&lw| (lw - max_lw).exp()).collect();
    let total: f64 = weights.iter().sum();
    weights.iter_mut().for_each(|w| *w /= total);

    let shapes = v[k..2 * k]
        .iter()
        .map(|&la| la.clamp(MIN_SHAPE.ln(), MAX_SHAPE.ln()).exp())
        .collect();
    let scale = v[2 * k].clamp(MIN_SCALE.ln(), MAX_SCALE.ln()).exp();
    MixtureModel::from_shapes(weights, shapes, scale)
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Extrapolate from three consecutive iterates of equal order.
///
/// Returns `None` when the iterates differ in K, the steps are degenerate, or the
/// extrapolated point is not finite.
pub fn extrapolate(x0: &MixtureModel, x1: &MixtureModel, x2: &MixtureModel) -> Option<MixtureModel> {
    let k = x0.n_components();
    if x1.n_components() != k || x2.n_components() != k {
        return None;
    }

    let (p0, p1, p2) = (to_vector(x0), to_vector(x1), to_vector(x2));
    if p0.iter().chain(&p1).chain(&p2).any(|x| !x.is_finite()) {
        return None;
    }

    let r: Vec<f64> = p1.iter().zip(&p0).map(|(a, b)| a - b).collect();
    let v: Vec<f64> = p2
        .iter()
        .zip(&p1)
        .zip(&p0)
        .map(|((c, b), a)| c - 2.0 * b + a)
        .collect();

    let (nr, nv) = (norm(&r), norm(&v));
    if nv <= 0.0 || !nv.is_finite() || !nr.is_finite() {
        return None;
    }
    let alpha = (-nr / nv).clamp(-MAX_STEP, -1.0);

    let x: Vec<f64> = p0
        .iter()
        .zip(&r)
        .zip(&v)
        .map(|((&a, &ri), &vi)| a - 2.0 * alpha * ri + alpha * alpha * vi)
        .collect();
    if x.iter().any(|xi| !xi.is_finite()) {
        return None;
    }
    Some(from_vector(&x, k))
}
