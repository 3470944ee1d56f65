//! Batch normalization across genes
//!
//! Genes are independent: each one is routed, fitted and resampled on its own with a
//! private RNG stream, and the output rows are reassembled in input order.

mod gene;

pub use gene::{GeneDiagnostics, GenePath};

use ndarray::{Array1, Array2};
use rayon::prelude::*;

use crate::data::{CountMatrix, NormalizedMatrix};
use crate::error::{DinoError, Result};
use crate::mixture::EmParams;
use crate::normalization::{resolve_depth, DepthInput, DepthSlope};
use crate::rng::resolve_seed;

/// Decimals beyond this exceed f64 resolution and overflow the rounding factor
pub const MAX_PRECISION: u32 = 15;

/// Configurable parameters for normalization
#[derive(Debug, Clone)]
pub struct NormalizeParams {
    /// Genes with fewer non-zero cells are depth-scaled instead of fitted
    pub min_nonzero: usize,
    /// Ceiling on the mixture order K
    pub max_components: usize,
    /// γ: pull of the resampled values toward count / depth
    pub concentration: f64,
    /// Worker threads; 0 uses every available core, 1 runs sequentially
    pub workers: usize,
    /// Base seed; `None` draws one from entropy
    pub seed: Option<u64>,
    pub em: EmParams,
    /// Fit each gene on at most this many randomly chosen cells
    pub max_fit_cells: Option<usize>,
    pub slope: DepthSlope,
    /// Round outputs to this many decimals
    pub precision: Option<u32>,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self {
            min_nonzero: 10,
            max_components: 100,
            concentration: 15.0,
            workers: 2,
            seed: None,
            em: EmParams::default(),
            max_fit_cells: Some(10_000),
            slope: DepthSlope::default(),
            precision: None,
        }
    }
}

fn config_error(reason: impl Into<String>) -> DinoError {
    DinoError::Configuration { reason: reason.into() }
}

impl NormalizeParams {
    /// Reject parameter values no gene could be normalized with
    pub fn validate(&self) -> Result<()> {
        if !self.concentration.is_finite() || self.concentration <= 0.0 {
            return Err(config_error(format!(
                "concentration must be positive and finite, got {}",
                self.concentration
            )));
        }
        if self.max_components < 1 {
            return Err(config_error("max_components must be at least 1"));
        }
        if self.min_nonzero < 1 {
            return Err(config_error("min_nonzero must be at least 1"));
        }
        if !(self.em.tol > 0.0) {
            return Err(config_error(format!("EM tolerance must be positive, got {}", self.em.tol)));
        }
        if self.em.max_iter < 1 {
            return Err(config_error("EM max_iter must be at least 1"));
        }
        if self.max_fit_cells == Some(0) {
            return Err(config_error("max_fit_cells must be at least 1"));
        }
        match self.slope {
            DepthSlope::Fixed(b) if !(b > 0.0 && b.is_finite()) => {
                return Err(config_error(format!("fixed depth slope must be positive, got {}", b)));
            }
            DepthSlope::Estimated { min, max } if !(min > 0.0 && min <= max && max.is_finite()) => {
                return Err(config_error(format!(
                    "depth slope bounds must satisfy 0 < min <= max, got [{}, {}]",
                    min, max
                )));
            }
            _ => {}
        }
        if let Some(p) = self.precision {
            if p > MAX_PRECISION {
                return Err(config_error(format!(
                    "precision must be at most {} decimals, got {}",
                    MAX_PRECISION, p
                )));
            }
        }
        Ok(())
    }
}

/// Normalized matrix plus what happened to each gene
#[derive(Debug, Clone)]
pub struct NormalizeResult {
    pub matrix: NormalizedMatrix,
    /// Depth used for every cell
    pub depth: Array1<f64>,
    /// One entry per gene, in matrix order
    pub diagnostics: Vec<GeneDiagnostics>,
}

impl NormalizeResult {
    pub fn summary(&self) -> NormalizeSummary {
        let count = |p: GenePath| self.diagnostics.iter().filter(|d| d.path == p).count();
        NormalizeSummary {
            total_genes: self.diagnostics.len(),
            resampled: count(GenePath::Resampled),
            scaled: count(GenePath::Scaled),
            degraded: count(GenePath::Degraded),
            not_converged: self
                .diagnostics
                .iter()
                .filter(|d| d.path == GenePath::Resampled && !d.converged)
                .count(),
            dropped_components: self.diagnostics.iter().map(|d| d.dropped_components).sum(),
        }
    }
}

/// Counts of genes per normalization path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeSummary {
    pub total_genes: usize,
    pub resampled: usize,
    pub scaled: usize,
    pub degraded: usize,
    pub not_converged: usize,
    pub dropped_components: usize,
}

impl std::fmt::Display for NormalizeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Normalization Summary")?;
        writeln!(f, "=====================")?;
        writeln!(f, "Total genes: {}", self.total_genes)?;
        writeln!(f, "Resampled: {}", self.resampled)?;
        writeln!(f, "  Not converged: {}", self.not_converged)?;
        writeln!(f, "  Dropped components: {}", self.dropped_components)?;
        writeln!(f, "Depth-scaled: {}", self.scaled)?;
        writeln!(f, "Degraded to scaling: {}", self.degraded)?;
        Ok(())
    }
}

/// Map `f` over gene indices on a pool of `workers` threads, keeping index order
fn run_genes<T, F>(n_genes: usize, workers: usize, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    if workers == 1 {
        return Ok((0..n_genes).map(f).collect());
    }
    // num_threads(0) lets rayon use every available core
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| config_error(format!("cannot start {} workers: {}", workers, e)))?;
    Ok(pool.install(|| (0..n_genes).into_par_iter().map(&f).collect()))
}

fn round_to(value: f64, factor: f64) -> f64 {
    (value * factor).round() / factor
}

/// Depth-normalize every gene of a count matrix.
///
/// `depth` defaults to per-cell totals divided by their median. Configuration and
/// input-level problems fail before any gene is processed; a gene whose fit fails
/// is depth-scaled and flagged as `Degraded` in the diagnostics.
pub fn normalize(counts: &CountMatrix, depth: Option<&DepthInput>, params: &NormalizeParams) -> Result<NormalizeResult> {
    params.validate()?;
    let depth = resolve_depth(counts, depth)?;
    let depth_slice = depth.to_vec();

    let base_seed = resolve_seed(params.seed);
    let n_genes = counts.n_genes();
    let n_cells = counts.n_cells();
    log::info!(
        "Normalizing {} genes x {} cells (workers {}, concentration {})",
        n_genes,
        n_cells,
        params.workers,
        params.concentration
    );

    let outputs = run_genes(n_genes, params.workers, |g| {
        gene::process_gene(
            g,
            &counts.gene_ids()[g],
            counts.gene_counts(g),
            &depth_slice,
            params,
            base_seed,
        )
    })?;

    let factor = params.precision.map(|p| 10f64.powi(p as i32));
    let mut values = Array2::zeros((n_genes, n_cells));
    let mut diagnostics = Vec::with_capacity(n_genes);
    for (g, out) in outputs.into_iter().enumerate() {
        for (j, v) in out.values.into_iter().enumerate() {
            values[[g, j]] = match factor {
                Some(f) => round_to(v, f),
                None => v,
            };
        }
        diagnostics.push(out.diagnostics);
    }

    let matrix = NormalizedMatrix::new(
        values,
        counts.gene_ids().to_vec(),
        counts.cell_ids().to_vec(),
        counts.is_sparse(),
    )?;
    let result = NormalizeResult {
        matrix,
        depth,
        diagnostics,
    };

    let summary = result.summary();
    log::info!(
        "Done: {} resampled, {} depth-scaled, {} degraded",
        summary.resampled,
        summary.scaled,
        summary.degraded
    );
    if summary.not_converged > 0 {
        log::warn!(
            "{} genes hit the EM iteration cap ({}) before converging",
            summary.not_converged,
            params.em.max_iter
        );
    }
    Ok(result)
}
