//! Gene-specific depth exponent
//!
//! Genes do not all scale linearly with depth. With an estimated slope b the gene is
//! normalized against δ^b instead of δ. b is the median (L1) regression slope of
//! ln(y) on ln(δ) over the gene's non-zero cells, clamped to a configured range.

/// Minimum number of non-zero cells with distinct depth needed to estimate a slope
const MIN_SLOPE_CELLS: usize = 3;
const MAX_IRLS_ITER: usize = 50;
const IRLS_TOL: f64 = 1e-8;
/// Floor on absolute residuals in the L1 reweighting
const RESIDUAL_FLOOR: f64 = 1e-6;

/// How the depth exponent is chosen per gene
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepthSlope {
    /// Same exponent for every gene (1.0 = plain depth)
    Fixed(f64),
    /// Estimated per gene, clamped to [min, max]
    Estimated { min: f64, max: f64 },
}

impl Default for DepthSlope {
    fn default() -> Self {
        DepthSlope::Fixed(1.0)
    }
}

impl DepthSlope {
    /// Default clamping range for estimated slopes
    pub fn estimated() -> Self {
        DepthSlope::Estimated { min: 0.5, max: 2.0 }
    }
}

/// Weighted least squares for y = b0 + b1 x; returns b1
fn weighted_slope(x: &[f64], y: &[f64], w: &[f64]) -> Option<f64> {
    let (mut sw, mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for ((&xi, &yi), &wi) in x.iter().zip(y).zip(w) {
        sw += wi;
        sx += wi * xi;
        sy += wi * yi;
        sxx += wi * xi * xi;
        sxy += wi * xi * yi;
    }
    let det = sw * sxx - sx * sx;
    if det.abs() < 1e-12 * sw.max(1.0) * sxx.max(1.0) {
        return None;
    }
    Some((sw * sxy - sx * sy) / det)
}

/// L1 regression slope by iteratively reweighted least squares
fn median_regression_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len();
    let mut w = vec![1.0; n];
    let mut slope = weighted_slope(x, y, &w)?;

    for _ in 0..MAX_IRLS_ITER {
        // Intercept for the current slope is the weighted fit's; recompute residuals
        let sw: f64 = w.iter().sum();
        let intercept = x
            .iter()
            .zip(y)
            .zip(&w)
            .map(|((&xi, &yi), &wi)| wi * (yi - slope * xi))
            .sum::<f64>()
            / sw;
        for i in 0..n {
            let r = (y[i] - intercept - slope * x[i]).abs();
            w[i] = 1.0 / r.max(RESIDUAL_FLOOR);
        }
        let next = weighted_slope(x, y, &w)?;
        let done = (next - slope).abs() < IRLS_TOL;
        slope = next;
        if done {
            break;
        }
    }
    slope.is_finite().then_some(slope)
}

/// Depth exponent for one gene
pub fn gene_slope(counts: &[f64], depth: &[f64], mode: DepthSlope) -> f64 {
    let (min, max) = match mode {
        DepthSlope::Fixed(b) => return b,
        DepthSlope::Estimated { min, max } => (min, max),
    };

    let (x, y): (Vec<f64>, Vec<f64>) = counts
        .iter()
        .zip(depth)
        .filter(|(&c, &d)| c > 0.0 && d > 0.0)
        .map(|(&c, &d)| (d.ln(), c.ln()))
        .unzip();

    if x.len() < MIN_SLOPE_CELLS {
        return 1.0_f64.clamp(min, max);
    }

    match median_regression_slope(&x, &y) {
        Some(b) => b.clamp(min, max),
        None => 1.0_f64.clamp(min, max),
    }
}

/// δ^b per cell; zero depth stays zero
pub fn effective_depth(depth: &[f64], slope: f64) -> Vec<f64> {
    if slope == 1.0 {
        return depth.to_vec();
    }
    depth
        .iter()
        .map(|&d| if d > 0.0 { d.powf(slope) } else { 0.0 })
        .collect()
}
