//! Per-cell sequencing depth
//!
//! The default depth is the cell's total count divided by the median total, so a
//! typical cell has depth 1. Callers may substitute any positive per-cell scalar
//! (for example pooled size factors), on the linear or the log scale.

use ndarray::Array1;

use crate::data::CountMatrix;
use crate::error::{DinoError, Result};
use crate::stats::median;

/// Caller-supplied depth values are accepted but flagged outside this median range
const MEDIAN_WARN_LOW: f64 = 0.5;
const MEDIAN_WARN_HIGH: f64 = 2.0;

/// Caller-supplied per-cell depth
#[derive(Debug, Clone, PartialEq)]
pub enum DepthInput {
    /// Depth on the linear scale
    Linear(Vec<f64>),
    /// Natural-log depth; exponentiated before use
    Log(Vec<f64>),
}

impl DepthInput {
    pub fn len(&self) -> usize {
        match self {
            DepthInput::Linear(v) | DepthInput::Log(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert to linear depth, validating each entry
    pub fn to_linear(&self) -> Result<Array1<f64>> {
        let linear: Vec<f64> = match self {
            DepthInput::Linear(v) => v.clone(),
            DepthInput::Log(v) => {
                if v.iter().any(|x| x.is_nan() || *x == f64::INFINITY) {
                    return Err(DinoError::InvalidDepth {
                        reason: "Log depth values must be finite or -inf".to_string(),
                    });
                }
                v.iter().map(|&x| x.exp()).collect()
            }
        };

        if linear.iter().any(|&x| !x.is_finite() || x < 0.0) {
            return Err(DinoError::InvalidDepth {
                reason: "Depth values must be non-negative finite numbers".to_string(),
            });
        }
        if !linear.is_empty() && linear.iter().all(|&x| x == 0.0) {
            return Err(DinoError::DegenerateInput {
                reason: "All depth values are zero".to_string(),
            });
        }
        Ok(Array1::from_vec(linear))
    }
}

/// Estimate depth as total count per cell over the median total
///
/// Cells without any counts get depth 0; the pipeline outputs 0 for them in every gene.
pub fn estimate_depth(counts: &CountMatrix) -> Result<Array1<f64>> {
    if counts.n_cells() == 0 || counts.n_genes() == 0 {
        return Err(DinoError::EmptyData {
            reason: "Count matrix is empty".to_string(),
        });
    }

    let totals = counts.cell_totals();
    if totals.iter().all(|&t| t == 0.0) {
        return Err(DinoError::DegenerateInput {
            reason: "All cells have zero total count".to_string(),
        });
    }

    let med = median(&totals);
    if med <= 0.0 || !med.is_finite() {
        return Err(DinoError::DegenerateInput {
            reason: "Median cell total is zero; more than half the cells are empty".to_string(),
        });
    }

    let n_empty = totals.iter().filter(|&&t| t == 0.0).count();
    if n_empty > 0 {
        log::warn!("{} cells have zero total count and will be normalized to 0", n_empty);
    }

    Ok(Array1::from_iter(totals.into_iter().map(|t| t / med)))
}

/// Resolve the depth used for normalization: supplied values or the estimate
pub fn resolve_depth(counts: &CountMatrix, depth: Option<&DepthInput>) -> Result<Array1<f64>> {
    let Some(input) = depth else {
        let est = estimate_depth(counts)?;
        log::info!("Estimated depth for {} cells from cell totals", est.len());
        return Ok(est);
    };

    if input.len() != counts.n_cells() {
        return Err(DinoError::DimensionMismatch {
            expected: format!("{} depth values", counts.n_cells()),
            got: format!("{} depth values", input.len()),
        });
    }

    let linear = input.to_linear()?;
    let med = median(linear.as_slice().unwrap_or(&[]));
    if !(MEDIAN_WARN_LOW..=MEDIAN_WARN_HIGH).contains(&med) {
        log::warn!(
            "Supplied depth has median {:.4}; values centered at 1 keep outputs on the count scale",
            med
        );
    }
    Ok(linear)
}
