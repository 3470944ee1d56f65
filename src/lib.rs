//! rust_dino: depth normalization of single-cell counts in Rust
//!
//! Each gene's latent expression is modeled as a mixture of Gammas with a shared
//! dispersion, fitted to the raw counts by accelerated EM. Normalized values are drawn
//! from each cell's posterior, tempered by a concentration γ that pulls them toward
//! count / depth. Genes with too few non-zero cells are divided by depth instead.
//!
//! # Example
//!
//! ```ignore
//! use rust_dino::prelude::*;
//!
//! let counts = read_count_matrix("counts.tsv")?;
//! let params = NormalizeParams { seed: Some(1), ..Default::default() };
//! let result = normalize(&counts, None, &params)?;
//! write_normalized("normalized.tsv", &result.matrix)?;
//! ```

pub mod cli;
pub mod data;
pub mod error;
pub mod io;
pub mod mixture;
pub mod normalization;
pub mod pipeline;
pub mod rng;
pub mod sampler;
pub mod stats;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::data::{CountMatrix, NormalizedMatrix};
    pub use crate::error::{DinoError, Result};
    pub use crate::io::{read_count_matrix, read_depth, write_depth, write_diagnostics, write_normalized};
    pub use crate::mixture::{fit_mixture, EmParams, FitNotice, MixtureFit, MixtureModel};
    pub use crate::normalization::{estimate_depth, DepthInput, DepthSlope};
    pub use crate::pipeline::{normalize, GeneDiagnostics, GenePath, NormalizeParams, NormalizeResult, NormalizeSummary};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Gamma, Poisson};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_full_pipeline() {
        // Two cell populations with 4x depth difference; gene 0 is bimodal, gene 1
        // unimodal, gene 2 has a handful of non-zero cells
        let mut rng = StdRng::seed_from_u64(2024);
        let n_cells = 120;
        let depth_true: Vec<f64> = (0..n_cells).map(|j| if j % 2 == 0 { 0.5 } else { 2.0 }).collect();
        let mut counts = Array2::zeros((3, n_cells));
        for j in 0..n_cells {
            let high = j % 3 == 0;
            let lambda0: f64 = Gamma::new(20.0, if high { 2.0 } else { 0.25 }).unwrap().sample(&mut rng);
            let lambda1: f64 = Gamma::new(4.0, 2.5).unwrap().sample(&mut rng);
            counts[[0, j]] = Poisson::new(lambda0 * depth_true[j]).unwrap().sample(&mut rng);
            counts[[1, j]] = Poisson::new(lambda1 * depth_true[j]).unwrap().sample(&mut rng);
        }
        for j in [3, 17, 40, 99] {
            counts[[2, j]] = 2.0;
        }

        let mut file = NamedTempFile::new().unwrap();
        let header: Vec<String> = (0..n_cells).map(|j| format!("cell{}", j)).collect();
        writeln!(file, "gene_id\t{}", header.join("\t")).unwrap();
        for (g, name) in ["bimodal", "unimodal", "rare"].iter().enumerate() {
            let row: Vec<String> = counts.row(g).iter().map(|v| v.to_string()).collect();
            writeln!(file, "{}\t{}", name, row.join("\t")).unwrap();
        }

        let matrix = read_count_matrix(file.path()).unwrap();
        let params = NormalizeParams {
            seed: Some(11),
            ..Default::default()
        };
        let result = normalize(&matrix, None, &params).unwrap();

        assert_eq!(result.diagnostics[0].path, GenePath::Resampled);
        assert_eq!(result.diagnostics[1].path, GenePath::Resampled);
        assert_eq!(result.diagnostics[2].path, GenePath::Scaled);
        assert!(result.diagnostics[0].components >= 1);

        let values = result.matrix.values();
        assert!(values.iter().all(|&v| v >= 0.0 && v.is_finite()));

        // Depth removed: the unimodal gene no longer differs 4x between depth groups
        let group_mean = |g: usize, parity: usize| {
            let cells: Vec<usize> = (0..n_cells).filter(|j| j % 2 == parity).collect();
            cells.iter().map(|&j| values[[g, j]]).sum::<f64>() / cells.len() as f64
        };
        let ratio = group_mean(1, 1) / group_mean(1, 0);
        assert!(ratio > 0.6 && ratio < 1.6, "depth ratio after normalization {}", ratio);

        let out = NamedTempFile::new().unwrap();
        write_normalized(out.path(), &result.matrix).unwrap();
        let written = std::fs::read_to_string(out.path()).unwrap();
        assert_eq!(written.lines().count(), 4);
        assert!(written.starts_with("gene_id\tcell0\tcell1"));
    }
}
