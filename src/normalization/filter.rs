//! Routing genes between mixture resampling and plain depth scaling

use ndarray::ArrayView1;

/// Depth the scaling path rescales to. Estimated depth has median 1, so scaled values
/// stay on the same scale as resampled ones.
pub const REFERENCE_DEPTH: f64 = 1.0;

/// How a gene is normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Fit a Gamma-Poisson mixture and resample from the posterior
    Resample,
    /// Too few informative cells for a stable fit: count / depth
    Scale,
}

/// Number of strictly positive entries in a gene's counts
pub fn count_nonzero(counts: ArrayView1<f64>) -> usize {
    counts.iter().filter(|&&y| y > 0.0).count()
}

/// Pick the normalization route from the number of non-zero cells
pub fn route_gene(counts: ArrayView1<f64>, min_nonzero: usize) -> (Route, usize) {
    let nnz = count_nonzero(counts);
    let route = if nnz < min_nonzero { Route::Scale } else { Route::Resample };
    (route, nnz)
}

/// Deterministic depth scaling. Cells with zero depth map to 0.
pub fn scale_by_depth(counts: ArrayView1<f64>, depth: &[f64]) -> Vec<f64> {
    counts
        .iter()
        .zip(depth)
        .map(|(&y, &d)| if d > 0.0 { REFERENCE_DEPTH * y / d } else { 0.0 })
        .collect()
}
