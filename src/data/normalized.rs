//! Depth-normalized output matrix

use ndarray::{Array2, ArrayView1, ArrayView2};
use sprs::{CsMat, TriMat};

use crate::error::{DinoError, Result};

/// Normalized expression, same shape and identifiers as the input counts.
#[derive(Debug, Clone)]
pub struct NormalizedMatrix {
    values: Array2<f64>,
    gene_ids: Vec<String>,
    cell_ids: Vec<String>,
    sparse_origin: bool,
}

impl NormalizedMatrix {
    pub(crate) fn new(
        values: Array2<f64>,
        gene_ids: Vec<String>,
        cell_ids: Vec<String>,
        sparse_origin: bool,
    ) -> Result<Self> {
        if values.dim() != (gene_ids.len(), cell_ids.len()) {
            return Err(DinoError::DimensionMismatch {
                expected: format!("{}x{}", gene_ids.len(), cell_ids.len()),
                got: format!("{}x{}", values.nrows(), values.ncols()),
            });
        }
        Ok(Self {
            values,
            gene_ids,
            cell_ids,
            sparse_origin,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_cells(&self) -> usize {
        self.values.ncols()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn gene_values(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.values.row(gene_idx)
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    /// Whether the counts this was computed from were sparse
    pub fn is_sparse(&self) -> bool {
        self.sparse_origin
    }

    /// Exact zeros (from the depth-scaling path) left implicit
    pub fn to_csr(&self) -> CsMat<f64> {
        let mut tri = TriMat::new(self.values.dim());
        for ((g, c), &v) in self.values.indexed_iter() {
            if v != 0.0 {
                tri.add_triplet(g, c, v);
            }
        }
        tri.to_csr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_to_csr_keeps_nonzero_only() {
        let m = NormalizedMatrix::new(
            array![[0.0, 1.5], [2.5, 0.0]],
            vec!["g1".to_string(), "g2".to_string()],
            vec!["c1".to_string(), "c2".to_string()],
            true,
        )
        .unwrap();
        let csr = m.to_csr();
        assert_eq!(csr.nnz(), 2);
        assert_eq!(csr.get(0, 1), Some(&1.5));
        assert_eq!(csr.get(1, 1), None);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let res = NormalizedMatrix::new(array![[1.0]], vec![], vec!["c".to_string()], false);
        assert!(res.is_err());
    }
}
