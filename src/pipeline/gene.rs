//! One gene's route → fit → resample pipeline

use ndarray::ArrayView1;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::NormalizeParams;
use crate::error::Result;
use crate::mixture::{fit_mixture, initialize, responsibilities, select_order, GeneData, MixtureFit};
use crate::normalization::{effective_depth, gene_slope, route_gene, scale_by_depth, Route};
use crate::rng::gene_rng;
use crate::sampler::sample_posterior;

/// How a gene's output row was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenePath {
    /// Mixture fit and posterior resampling
    Resampled,
    /// Too few non-zero cells: count / depth
    Scaled,
    /// Mixture fit failed; fell back to count / depth
    Degraded,
}

/// Per-gene summary of how normalization went
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneDiagnostics {
    pub gene_id: String,
    pub path: GenePath,
    /// Cells with a strictly positive count
    pub nonzero: usize,
    /// Components in the fitted mixture (0 when not fitted)
    pub components: usize,
    pub initial_components: usize,
    pub dropped_components: usize,
    pub iterations: usize,
    pub converged: bool,
    /// Log-likelihood of the fitted mixture on the cells it was fitted to
    pub log_likelihood: Option<f64>,
    /// Depth exponent the gene was normalized against
    pub slope: f64,
    /// Cells used for fitting
    pub fit_cells: usize,
}

impl GeneDiagnostics {
    fn unfitted(gene_id: &str, path: GenePath, nonzero: usize) -> Self {
        Self {
            gene_id: gene_id.to_string(),
            path,
            nonzero,
            components: 0,
            initial_components: 0,
            dropped_components: 0,
            iterations: 0,
            converged: false,
            log_likelihood: None,
            slope: 1.0,
            fit_cells: 0,
        }
    }
}

/// Output row plus diagnostics for one gene
#[derive(Debug, Clone)]
pub(crate) struct GeneOutput {
    pub values: Vec<f64>,
    pub diagnostics: GeneDiagnostics,
}

/// Cells the mixture is fitted to: every cell with positive depth, randomly thinned to
/// at most `max_cells`. Indices are returned in increasing order.
pub(crate) fn fit_subset(depth: &[f64], max_cells: Option<usize>, rng: &mut StdRng) -> Vec<usize> {
    let usable: Vec<usize> = (0..depth.len()).filter(|&j| depth[j] > 0.0).collect();
    match max_cells {
        Some(m) if usable.len() > m => {
            let mut picked: Vec<usize> = rand::seq::index::sample(rng, usable.len(), m)
                .into_iter()
                .map(|i| usable[i])
                .collect();
            picked.sort_unstable();
            picked
        }
        _ => usable,
    }
}

struct Resampled {
    values: Vec<f64>,
    fit: MixtureFit,
    slope: f64,
    fit_cells: usize,
}

fn resample_gene(counts: &[f64], depth: &[f64], params: &NormalizeParams, rng: &mut StdRng) -> Result<Resampled> {
    let slope = gene_slope(counts, depth, params.slope);
    let depth = effective_depth(depth, slope);

    let cells = fit_subset(&depth, params.max_fit_cells, rng);
    let fit_data = GeneData::new(
        cells.iter().map(|&j| counts[j]).collect(),
        cells.iter().map(|&j| depth[j]).collect(),
    );
    let positive = fit_data.positive_rates().len();
    let k = select_order(positive, params.max_components);

    let init = initialize(&fit_data, k)?;
    let fit = fit_mixture(&fit_data, init, &params.em)?;

    let full = GeneData::new(counts.to_vec(), depth.clone());
    let tau = responsibilities(&full, &fit.model);
    let values = sample_posterior(&fit.model, &tau, counts, &depth, params.concentration, rng)?;

    Ok(Resampled {
        values,
        fit,
        slope,
        fit_cells: cells.len(),
    })
}

/// Normalize one gene. Never fails: a gene whose fit breaks down is scaled instead.
pub(crate) fn process_gene(
    gene_idx: usize,
    gene_id: &str,
    counts: ArrayView1<f64>,
    depth: &[f64],
    params: &NormalizeParams,
    base_seed: u64,
) -> GeneOutput {
    let (route, nonzero) = route_gene(counts, params.min_nonzero);
    if route == Route::Scale {
        return GeneOutput {
            values: scale_by_depth(counts, depth),
            diagnostics: GeneDiagnostics::unfitted(gene_id, GenePath::Scaled, nonzero),
        };
    }

    let y = counts.to_vec();
    let mut rng = gene_rng(base_seed, gene_idx);
    match resample_gene(&y, depth, params, &mut rng) {
        Ok(r) => {
            log::debug!(
                "Gene {}: K {} -> {}, {} iterations, converged {}, loglik {:.4}",
                gene_id,
                r.fit.initial_components,
                r.fit.model.n_components(),
                r.fit.iterations,
                r.fit.converged,
                r.fit.log_likelihood
            );
            GeneOutput {
                values: r.values,
                diagnostics: GeneDiagnostics {
                    gene_id: gene_id.to_string(),
                    path: GenePath::Resampled,
                    nonzero,
                    components: r.fit.model.n_components(),
                    initial_components: r.fit.initial_components,
                    dropped_components: r.fit.dropped_components(),
                    iterations: r.fit.iterations,
                    converged: r.fit.converged,
                    log_likelihood: Some(r.fit.log_likelihood),
                    slope: r.slope,
                    fit_cells: r.fit_cells,
                },
            }
        }
        Err(e) => {
            log::warn!("Gene {}: mixture fit failed ({}); using depth scaling", gene_id, e);
            GeneOutput {
                values: scale_by_depth(counts, depth),
                diagnostics: GeneDiagnostics::unfitted(gene_id, GenePath::Degraded, nonzero),
            }
        }
    }
}
