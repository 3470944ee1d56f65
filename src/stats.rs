//! Statistical utility functions shared across modules

use std::cmp::Ordering;

/// Sort a copy of the finite values in `x`
fn sorted_finite(x: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = x.iter().copied().filter(|v| v.is_finite()).collect();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    v
}

/// Quantile of already-sorted data with linear interpolation between order
/// statistics (Hyndman-Fan type 7).
pub fn quantile_sorted(sorted: &[f64], prob: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * prob.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

/// Median of the finite values; NaN for empty input
pub fn median(x: &[f64]) -> f64 {
    quantile_sorted(&sorted_finite(x), 0.5)
}

/// Sample mean and (n - 1) variance. Variance is 0 for fewer than two values.
pub fn mean_variance(x: &[f64]) -> (f64, f64) {
    let n = x.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let mean = x.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, 0.0);
    }
    let var = x.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    (mean, var)
}

/// log(sum(exp(x))) without overflow
pub fn log_sum_exp(x: &[f64]) -> f64 {
    let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + x.iter().map(|&v| (v - max).exp()).sum::<f64>().ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_quantile_sorted_endpoints() {
        let x = vec![10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(quantile_sorted(&x, 0.0), 10.0);
        assert_eq!(quantile_sorted(&x, 1.0), 50.0);
        assert!((quantile_sorted(&x, 0.25) - 20.0).abs() < 1e-12);
        assert!((quantile_sorted(&x, 0.1) - 14.0).abs() < 1e-12);
    }

    #[test]
    fn test_mean_variance() {
        let (m, v) = mean_variance(&[1.0, 2.0, 3.0, 4.0]);
        assert!((m - 2.5).abs() < 1e-12);
        assert!((v - 5.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_log_sum_exp_stable() {
        let v = log_sum_exp(&[1000.0, 1000.0]);
        assert!((v - (1000.0 + 2f64.ln())).abs() < 1e-10);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }
}
