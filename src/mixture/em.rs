//! Accelerated EM for the per-gene Gamma-Poisson mixture
//!
//! The M-step is a sequence of exact conditional maximizations of the expected
//! complete-data log-likelihood Q:
//!
//! 1. π_k = mean_j τ_kj
//! 2. θ given shapes: root of Σ_j y_j = Σ_j (ā_j + y_j) θδ_j / (1 + θδ_j), with
//!    ā_j = Σ_k τ_kj a_k. The right side increases strictly in θ.
//! 3. a_k given θ: root of Σ_j τ_kj [ψ(y_j + a) − ψ(a)] = Σ_j τ_kj ln(1 + θδ_j).
//!    Q is concave in a_k, so the root is its maximizer.
//!
//! Each step cannot decrease Q, hence the observed-data log-likelihood never decreases
//! across plain EM updates.

use ndarray::Array2;
use statrs::function::gamma::ln_gamma;

use super::accelerate::extrapolate;
use super::negative_binomial::{
    digamma_diff, trigamma_diff, GeneData, MAX_SCALE, MAX_SHAPE, MIN_SCALE, MIN_SHAPE,
};
use super::{EmParams, FitNotice, MixtureFit, MixtureModel};
use crate::error::{DinoError, Result};
use crate::stats::log_sum_exp;

const MAX_ROOT_ITER: usize = 100;
const ROOT_TOL: f64 = 1e-12;

/// Components expected to hold fewer cells than this are dropped
const MIN_EXPECTED_CELLS: f64 = 1e-3;

/// Responsibilities and log-likelihood at one parameter value
#[derive(Debug, Clone)]
pub struct EStep {
    /// τ[k][j], components in rows and cells in columns; each column sums to 1
    pub tau: Array2<f64>,
    /// Observed-data log-likelihood
    pub log_likelihood: f64,
}

/// Root of a strictly decreasing function on [lo, hi].
///
/// `f` returns the value and derivative. Newton steps are used while they stay inside
/// the shrinking bracket, bisection otherwise. If the function does not change sign
/// the bound on the side of the root is returned.
fn newton_bracketed<F>(f: F, mut lo: f64, mut hi: f64, start: f64) -> f64
where
    F: Fn(f64) -> (f64, f64),
{
    if f(lo).0 <= 0.0 {
        return lo;
    }
    if f(hi).0 >= 0.0 {
        return hi;
    }

    let mut t = start.clamp(lo, hi);
    for _ in 0..MAX_ROOT_ITER {
        let (value, deriv) = f(t);
        if value == 0.0 {
            return t;
        }
        if value > 0.0 {
            lo = t;
        } else {
            hi = t;
        }
        let newton = t - value / deriv;
        let next = if deriv < 0.0 && newton.is_finite() && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
        if (next - t).abs() < ROOT_TOL || hi - lo < ROOT_TOL {
            return next;
        }
        t = next;
    }
    t
}

/// Compute responsibilities and the observed-data log-likelihood
pub fn e_step(data: &GeneData, model: &MixtureModel) -> EStep {
    let k = model.n_components();
    let n = data.n_cells();
    let theta = model.dispersion();
    let ln_theta = theta.ln();
    let shapes = model.shapes();
    let ln_weights: Vec<f64> = model.weights().iter().map(|w| w.ln()).collect();

    // ln Γ(y + a_k) − ln Γ(a_k) per component and distinct count
    let levels = data.levels();
    let lgamma: Vec<Vec<f64>> = shapes
        .iter()
        .map(|&a| {
            let base = ln_gamma(a);
            levels
                .iter()
                .map(|&y| if y > 0.0 { ln_gamma(y + a) - base } else { 0.0 })
                .collect()
        })
        .collect();

    let mut tau = Array2::zeros((k, n));
    let mut log_likelihood = 0.0;
    let mut terms = vec![0.0; k];

    for j in 0..n {
        let y = data.counts()[j];
        let d = data.depth()[j];
        let level = data.level_of(j);
        let l1p = (theta * d).ln_1p();
        let cell_term = if y > 0.0 {
            y * (ln_theta + d.ln() - l1p)
        } else {
            0.0
        } - data.ln_factorial(level);

        for c in 0..k {
            terms[c] = ln_weights[c] + lgamma[c][level] - shapes[c] * l1p + cell_term;
        }
        let lse = log_sum_exp(&terms);
        log_likelihood += lse;

        if lse.is_finite() {
            for c in 0..k {
                tau[[c, j]] = (terms[c] - lse).exp();
            }
        } else {
            // No component can produce this cell (zero depth with a positive count)
            for c in 0..k {
                tau[[c, j]] = model.weights()[c];
            }
        }
    }

    EStep { tau, log_likelihood }
}

/// Responsibilities of every cell under a fitted model
pub fn responsibilities(data: &GeneData, model: &MixtureModel) -> Array2<f64> {
    e_step(data, model).tau
}

/// Shared scale θ maximizing Q with the shapes held fixed
fn update_scale(data: &GeneData, tau: &Array2<f64>, shapes: &[f64], current: f64) -> f64 {
    let total = data.total();
    if total <= 0.0 {
        return current;
    }

    let n = data.n_cells();
    // ā_j + y_j per cell
    let weight: Vec<f64> = (0..n)
        .map(|j| {
            let abar: f64 = shapes.iter().enumerate().map(|(c, &a)| tau[[c, j]] * a).sum();
            abar + data.counts()[j]
        })
        .collect();
    let depth = data.depth();

    // h(t) = Σy − Σ (ā + y) s/(1 + s), s = e^t δ; decreasing in t
    let h = |t: f64| {
        let theta = t.exp();
        let mut value = total;
        let mut deriv = 0.0;
        for (&w, &d) in weight.iter().zip(depth) {
            let s = theta * d;
            let p = s / (1.0 + s);
            value -= w * p;
            deriv -= w * p / (1.0 + s);
        }
        (value, deriv)
    };

    newton_bracketed(h, MIN_SCALE.ln(), MAX_SCALE.ln(), current.ln()).exp()
}

/// Shape a_k maximizing Q for one component with θ held fixed
fn update_shape(levels: &[f64], level_weight: &[f64], cost: f64, current: f64) -> f64 {
    let has_positive = levels
        .iter()
        .zip(level_weight)
        .any(|(&y, &w)| y > 0.0 && w > 0.0);
    if !has_positive && cost <= 0.0 {
        return current;
    }

    // g(s) = Σ_l w_l [ψ(y_l + a) − ψ(a)] − cost, a = e^s; decreasing in s
    let g = |s: f64| {
        let a = s.exp();
        let mut value = -cost;
        let mut deriv = 0.0;
        for (&y, &w) in levels.iter().zip(level_weight) {
            if y > 0.0 && w > 0.0 {
                value += w * digamma_diff(y, a);
                deriv += w * a * trigamma_diff(y, a);
            }
        }
        (value, deriv)
    };

    newton_bracketed(g, MIN_SHAPE.ln(), MAX_SHAPE.ln(), current.ln()).exp()
}

/// One M-step from the responsibilities of `model`
pub fn m_step(data: &GeneData, tau: &Array2<f64>, model: &MixtureModel) -> MixtureModel {
    let k = model.n_components();
    let n = data.n_cells();

    let weights: Vec<f64> = (0..k).map(|c| tau.row(c).sum() / n as f64).collect();

    let scale = update_scale(data, tau, model.shapes(), model.dispersion());

    let l1p: Vec<f64> = data.depth().iter().map(|&d| (scale * d).ln_1p()).collect();
    let n_levels = data.levels().len();
    let mut level_weight = vec![0.0; n_levels];
    let shapes: Vec<f64> = (0..k)
        .map(|c| {
            level_weight.iter_mut().for_each(|w| *w = 0.0);
            let mut cost = 0.0;
            for j in 0..n {
                let t = tau[[c, j]];
                level_weight[data.level_of(j)] += t;
                cost += t * l1p[j];
            }
            update_shape(data.levels(), &level_weight, cost, model.shapes()[c])
        })
        .collect();

    MixtureModel::from_shapes(weights, shapes, scale)
}

/// Remove collapsed or non-finite components and renormalize the weights
fn prune(model: MixtureModel, n_cells: usize, notices: &mut Vec<FitNotice>) -> Result<MixtureModel> {
    let min_weight = MIN_EXPECTED_CELLS / n_cells.max(1) as f64;
    let scale = model.dispersion();
    let mut weights = Vec::with_capacity(model.n_components());
    let mut shapes = Vec::with_capacity(model.n_components());

    for (&w, &a) in model.weights().iter().zip(model.shapes()) {
        let mean = a * scale;
        if w >= min_weight && w.is_finite() && mean.is_finite() && mean > 0.0 {
            weights.push(w);
            shapes.push(a);
        } else {
            log::debug!("Dropping mixture component (mean {:.4e}, weight {:.3e})", mean, w);
            notices.push(FitNotice::DroppedComponent { mean, weight: w });
        }
    }

    let total: f64 = weights.iter().sum();
    if weights.is_empty() || !total.is_finite() || total <= 0.0 || !scale.is_finite() {
        return Err(DinoError::NumericalInstability {
            operation: "EM update".to_string(),
            details: "every mixture component collapsed".to_string(),
        });
    }
    weights.iter_mut().for_each(|w| *w /= total);
    Ok(MixtureModel::from_shapes(weights, shapes, scale))
}

/// Plain EM map F: M-step from the given responsibilities, then pruning
fn em_update(
    data: &GeneData,
    estep: &EStep,
    model: &MixtureModel,
    notices: &mut Vec<FitNotice>,
) -> Result<(MixtureModel, EStep)> {
    let next = prune(m_step(data, &estep.tau, model), data.n_cells(), notices)?;
    let next_e = e_step(data, &next);
    if !next_e.log_likelihood.is_finite() {
        return Err(DinoError::NumericalInstability {
            operation: "EM update".to_string(),
            details: format!("log-likelihood became {}", next_e.log_likelihood),
        });
    }
    Ok((next, next_e))
}

/// Accelerated step from x0 with plain images x1, x2: extrapolate, then take one
/// stabilizing EM update from the extrapolated point
fn accelerated_step(
    data: &GeneData,
    x0: &MixtureModel,
    x1: &MixtureModel,
    x2: &MixtureModel,
) -> Option<(MixtureModel, EStep, Vec<FitNotice>)> {
    let xa = extrapolate(x0, x1, x2)?;
    let ea = e_step(data, &xa);
    if !ea.log_likelihood.is_finite() {
        return None;
    }
    let mut notices = Vec::new();
    let (xs, es) = em_update(data, &ea, &xa, &mut notices).ok()?;
    Some((xs, es, notices))
}

/// Fit a mixture to one gene's counts by accelerated EM.
///
/// Each cycle performs two plain EM updates x0 → x1 → x2. With acceleration on, the
/// extrapolated-and-stabilized iterate replaces x2 only when its log-likelihood is at
/// least that of x2; otherwise the cycle keeps the plain update. Hitting `max_iter`
/// is not an error: the last iterate is returned with a `NonConvergence` notice.
pub fn fit_mixture(data: &GeneData, init: MixtureModel, params: &EmParams) -> Result<MixtureFit> {
    if !init.is_valid() {
        return Err(DinoError::NumericalInstability {
            operation: "EM start".to_string(),
            details: "invalid starting mixture".to_string(),
        });
    }

    let initial_components = init.n_components();
    let mut notices = Vec::new();
    let mut model = init;
    let mut current = e_step(data, &model);
    if !current.log_likelihood.is_finite() {
        return Err(DinoError::NumericalInstability {
            operation: "EM start".to_string(),
            details: format!("initial log-likelihood is {}", current.log_likelihood),
        });
    }

    let mut trace = vec![current.log_likelihood];
    let mut iterations = 0;
    let mut accelerated_steps = 0;
    let mut converged = false;
    let mut relative_change = f64::INFINITY;

    while iterations < params.max_iter {
        iterations += 1;

        let mut plain_notices = Vec::new();
        let (x1, e1) = em_update(data, &current, &model, &mut plain_notices)?;
        let (x2, e2) = em_update(data, &e1, &x1, &mut plain_notices)?;

        let accelerated = if params.accelerate {
            accelerated_step(data, &model, &x1, &x2)
        } else {
            None
        };

        let (next, next_e) = match accelerated {
            Some((xs, es, step_notices)) if es.log_likelihood >= e2.log_likelihood => {
                accelerated_steps += 1;
                notices.extend(step_notices);
                (xs, es)
            }
            // Extrapolation unavailable or worse than plain EM: keep the plain update
            _ => {
                notices.extend(plain_notices);
                (x2, e2)
            }
        };

        relative_change = (next_e.log_likelihood - current.log_likelihood).abs()
            / current.log_likelihood.abs().max(f64::MIN_POSITIVE);
        model = next;
        current = next_e;
        trace.push(current.log_likelihood);

        if relative_change < params.tol {
            converged = true;
            break;
        }
    }

    if !converged {
        notices.push(FitNotice::NonConvergence {
            iterations,
            relative_change,
        });
    }

    Ok(MixtureFit {
        log_likelihood: current.log_likelihood,
        model,
        trace,
        iterations,
        converged,
        initial_components,
        accelerated_steps,
        notices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixture::{initialize, select_order};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Gamma, Poisson};

    /// Gamma-Poisson draws: λ ~ Gamma(mean/θ, θ), y ~ Poisson(λ δ)
    fn simulate(rng: &mut StdRng, mean: f64, theta: f64, depth: &[f64]) -> Vec<f64> {
        let gamma = Gamma::new(mean / theta, theta).unwrap();
        depth
            .iter()
            .map(|&d| {
                let lambda: f64 = gamma.sample(rng);
                if lambda * d <= 0.0 {
                    0.0
                } else {
                    Poisson::new(lambda * d).unwrap().sample(rng)
                }
            })
            .collect()
    }

    fn fit_counts(counts: Vec<f64>, depth: Vec<f64>, params: &EmParams) -> (GeneData, MixtureFit) {
        let data = GeneData::new(counts, depth);
        let nnz = data.counts().iter().filter(|&&y| y > 0.0).count();
        let init = initialize(&data, select_order(nnz, 100)).unwrap();
        let fit = fit_mixture(&data, init, params).unwrap();
        (data, fit)
    }

    fn varied_depth(rng: &mut StdRng, n: usize) -> Vec<f64> {
        let g = Gamma::new(8.0, 1.0 / 8.0).unwrap();
        (0..n).map(|_| g.sample(rng)).collect()
    }

    #[test]
    fn test_root_finder_decreasing() {
        let root = newton_bracketed(|x| (2.0 - x, -1.0), -10.0, 10.0, 0.0);
        assert!((root - 2.0).abs() < 1e-10);
        // No sign change: returns the bound on the side of the root
        assert_eq!(newton_bracketed(|_| (-1.0, 0.0), 0.0, 1.0, 0.5), 0.0);
    }

    #[test]
    fn test_responsibilities_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(11);
        let depth = varied_depth(&mut rng, 150);
        let counts = simulate(&mut rng, 8.0, 2.0, &depth);
        let data = GeneData::new(counts, depth);
        let model = initialize(&data, 4).unwrap();
        let e = e_step(&data, &model);
        for j in 0..data.n_cells() {
            let s: f64 = e.tau.column(j).sum();
            assert!((s - 1.0).abs() < 1e-10, "cell {} sums to {}", j, s);
        }
    }

    #[test]
    fn test_m_step_does_not_decrease_likelihood() {
        let mut rng = StdRng::seed_from_u64(12);
        let depth = varied_depth(&mut rng, 120);
        let counts = simulate(&mut rng, 15.0, 3.0, &depth);
        let data = GeneData::new(counts, depth);
        let mut model = initialize(&data, 5).unwrap();
        let mut e = e_step(&data, &model);
        for _ in 0..25 {
            let next = m_step(&data, &e.tau, &model);
            let next_e = e_step(&data, &next);
            assert!(next_e.log_likelihood >= e.log_likelihood - 1e-9 * e.log_likelihood.abs());
            model = next;
            e = next_e;
        }
    }

    #[test]
    fn test_weights_sum_to_one_after_fit() {
        let mut rng = StdRng::seed_from_u64(13);
        let depth = varied_depth(&mut rng, 300);
        let counts = simulate(&mut rng, 4.0, 1.0, &depth);
        let (data, fit) = fit_counts(counts, depth, &EmParams::default());
        let wsum: f64 = fit.model.weights().iter().sum();
        assert!((wsum - 1.0).abs() < 1e-10);
        assert!(fit.model.is_valid());
        assert!(fit.model.means().iter().all(|&m| m > 0.0));
        let tau = responsibilities(&data, &fit.model);
        for j in 0..data.n_cells() {
            assert!((tau.column(j).sum() - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_log_likelihood_monotone() {
        let mut rng = StdRng::seed_from_u64(14);
        let depth = varied_depth(&mut rng, 250);
        let mut counts = simulate(&mut rng, 6.0, 1.0, &depth[..125]);
        counts.extend(simulate(&mut rng, 40.0, 1.0, &depth[125..]));
        for accelerate in [false, true] {
            let params = EmParams {
                accelerate,
                ..EmParams::default()
            };
            let (_, fit) = fit_counts(counts.clone(), depth.clone(), &params);
            for w in fit.trace.windows(2) {
                assert!(
                    w[1] >= w[0] - 1e-6 * w[0].abs(),
                    "log-likelihood decreased from {} to {} (accelerate = {})",
                    w[0],
                    w[1],
                    accelerate
                );
            }
        }
    }

    #[test]
    fn test_acceleration_reaches_same_optimum() {
        let mut rng = StdRng::seed_from_u64(15);
        let depth = varied_depth(&mut rng, 200);
        let counts = simulate(&mut rng, 10.0, 2.0, &depth);
        let plain = EmParams {
            accelerate: false,
            tol: 1e-9,
            ..EmParams::default()
        };
        let fast = EmParams {
            accelerate: true,
            tol: 1e-9,
            ..EmParams::default()
        };
        let (_, fit_plain) = fit_counts(counts.clone(), depth.clone(), &plain);
        let (_, fit_fast) = fit_counts(counts, depth, &fast);
        assert!(fit_fast.log_likelihood >= fit_plain.log_likelihood - 1e-3 * fit_plain.log_likelihood.abs());
        assert!(fit_fast.accelerated_steps > 0);
    }

    #[test]
    fn test_iteration_cap_is_not_an_error() {
        let mut rng = StdRng::seed_from_u64(16);
        let depth = varied_depth(&mut rng, 200);
        let counts = simulate(&mut rng, 10.0, 2.0, &depth);
        let params = EmParams {
            max_iter: 2,
            tol: 1e-300,
            accelerate: false,
        };
        let (_, fit) = fit_counts(counts, depth, &params);
        assert!(!fit.converged);
        assert_eq!(fit.iterations, 2);
        assert!(fit
            .notices
            .iter()
            .any(|n| matches!(n, FitNotice::NonConvergence { iterations: 2, .. })));
        assert!(fit.model.is_valid());
    }

    #[test]
    fn test_collapsed_component_is_dropped() {
        let model = MixtureModel::from_shapes(vec![0.6, 0.4 - 1e-12, 1e-12], vec![2.0, 5.0, 9.0], 1.0);
        let mut notices = Vec::new();
        let pruned = prune(model, 100, &mut notices).unwrap();
        assert_eq!(pruned.n_components(), 2);
        assert_eq!(notices.len(), 1);
        assert!((pruned.weights().iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_dropped_notices_match_removed_components() {
        let mut rng = StdRng::seed_from_u64(17);
        let depth = varied_depth(&mut rng, 200);
        let counts = simulate(&mut rng, 10.0, 2.0, &depth);
        let data = GeneData::new(counts, depth);
        for accelerate in [false, true] {
            // The far component explains no cell and collapses on the first update
            let init = MixtureModel::from_means(vec![0.5, 0.5 - 1e-4, 1e-4], &[6.0, 14.0, 5000.0], 2.0);
            let params = EmParams {
                accelerate,
                ..EmParams::default()
            };
            let fit = fit_mixture(&data, init, &params).unwrap();
            assert_eq!(fit.initial_components, 3);
            assert!(fit.model.n_components() < 3);
            assert_eq!(
                fit.dropped_components(),
                fit.initial_components - fit.model.n_components(),
                "accelerate = {}",
                accelerate
            );
        }
    }

    #[test]
    fn test_single_negative_binomial_recovered() {
        let (mean, theta) = (20.0, 5.0);
        let mut rng = StdRng::seed_from_u64(2024);
        let depth = vec![1.0; 200];
        let counts = simulate(&mut rng, mean, theta, &depth);
        let (_, fit) = fit_counts(counts, depth, &EmParams::default());

        let fitted_mean = fit.model.mean();
        assert!((fitted_mean - mean).abs() / mean < 0.15, "mean {}", fitted_mean);

        // Latent variance μθ of the generating Gamma
        let fitted_var = fit.model.latent_variance();
        let true_var = mean * theta;
        assert!((fitted_var - true_var).abs() / true_var < 0.5, "latent variance {}", fitted_var);

        // Kolmogorov distance between fitted and generating marginal CDFs
        let truth = MixtureModel::from_means(vec![1.0], &[mean], theta);
        let (mut cdf_fit, mut cdf_true, mut ks) = (0.0, 0.0, 0.0f64);
        for y in 0..400 {
            cdf_fit += fit.model.log_pmf(y as f64, 1.0).exp();
            cdf_true += truth.log_pmf(y as f64, 1.0).exp();
            ks = ks.max((cdf_fit - cdf_true).abs());
        }
        assert!(ks < 0.15, "Kolmogorov distance {}", ks);
    }

    #[test]
    fn test_two_negative_binomials_separated() {
        let mut rng = StdRng::seed_from_u64(7);
        let depth = vec![1.0; 300];
        let mut counts = simulate(&mut rng, 5.0, 0.5, &depth[..150]);
        counts.extend(simulate(&mut rng, 50.0, 0.5, &depth[150..]));
        let (_, fit) = fit_counts(counts, depth, &EmParams::default());

        let means = fit.model.means();
        let weights = fit.model.weights();
        let low: f64 = means.iter().zip(weights).filter(|(&m, _)| m < 20.0).map(|(_, &w)| w).sum();
        let low_mean: f64 = means
            .iter()
            .zip(weights)
            .filter(|(&m, _)| m < 20.0)
            .map(|(&m, &w)| m * w)
            .sum::<f64>()
            / low;
        let high_mean: f64 = means
            .iter()
            .zip(weights)
            .filter(|(&m, _)| m >= 20.0)
            .map(|(&m, &w)| m * w)
            .sum::<f64>()
            / (1.0 - low);

        assert!((low - 0.5).abs() < 0.1, "low-group weight {}", low);
        assert!(low_mean > 3.0 && low_mean < 7.5, "low-group mean {}", low_mean);
        assert!(high_mean > 40.0 && high_mean < 60.0, "high-group mean {}", high_mean);

        // The heaviest component of each group carries at least half a uniform share
        let share = 0.5 / fit.model.n_components() as f64;
        let heaviest = |keep: &dyn Fn(f64) -> bool| {
            means
                .iter()
                .zip(weights)
                .filter(|(&m, _)| keep(m))
                .map(|(_, &w)| w)
                .fold(0.0, f64::max)
        };
        assert!(heaviest(&|m| m < 20.0) >= share);
        assert!(heaviest(&|m| m >= 20.0) >= share);
    }
}
