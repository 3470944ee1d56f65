//! Count matrix representation for single-cell data

use std::collections::HashMap;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use sprs::{CsMat, TriMat};

use crate::error::{DinoError, Result};

/// Deduplicate names by appending _1, _2, etc. to duplicates
fn deduplicate_names(names: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for name in &names {
        *seen.entry(name.clone()).or_insert(0) += 1;
    }
    if !seen.values().any(|&c| c > 1) {
        return names;
    }
    seen.clear();
    let mut result = Vec::with_capacity(names.len());
    for name in names {
        let count = seen.entry(name.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            result.push(name);
        } else {
            let new_name = format!("{}_{}", name, *count - 1);
            log::warn!("Duplicate gene name '{}' renamed to '{}'", name, new_name);
            result.push(new_name);
        }
    }
    result
}

/// Raw UMI/read counts, genes in rows and cells in columns.
///
/// The matrix is immutable once built; normalization reads it and never writes back.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    cell_ids: Vec<String>,
    /// Built from a sparse source; the normalized output can be handed back as CSR
    sparse_origin: bool,
}

impl CountMatrix {
    /// Create a new count matrix from dense data
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, cell_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_cells) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(DinoError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }

        if cell_ids.len() != n_cells {
            return Err(DinoError::DimensionMismatch {
                expected: format!("{} cell IDs", n_cells),
                got: format!("{} cell IDs", cell_ids.len()),
            });
        }

        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(DinoError::InvalidCountMatrix {
                reason: "Counts must be non-negative finite values".to_string(),
            });
        }

        if counts.iter().any(|&x| x != x.round()) {
            log::warn!(
                "Some count values are not integers. The Gamma-Poisson model expects counts; \
                 non-integer values are accepted but may distort the fitted mixtures."
            );
        }

        let gene_ids = deduplicate_names(gene_ids);

        Ok(Self {
            counts,
            gene_ids,
            cell_ids,
            sparse_origin: false,
        })
    }

    /// Create from integer counts
    pub fn from_integers(counts: Array2<u32>, gene_ids: Vec<String>, cell_ids: Vec<String>) -> Result<Self> {
        Self::new(counts.mapv(|x| x as f64), gene_ids, cell_ids)
    }

    /// Create from (gene, cell, value) triplets. Repeated coordinates are summed.
    pub fn from_triplets(
        triplets: &[(usize, usize, f64)],
        gene_ids: Vec<String>,
        cell_ids: Vec<String>,
    ) -> Result<Self> {
        let shape = (gene_ids.len(), cell_ids.len());
        let mut tri = TriMat::new(shape);
        for &(g, c, v) in triplets {
            if g >= shape.0 || c >= shape.1 {
                return Err(DinoError::InvalidCountMatrix {
                    reason: format!("Triplet ({}, {}) outside a {}x{} matrix", g, c, shape.0, shape.1),
                });
            }
            tri.add_triplet(g, c, v);
        }
        let csr: CsMat<f64> = tri.to_csr();
        Self::from_csr(&csr, gene_ids, cell_ids)
    }

    /// Create from a CSR matrix (genes x cells)
    pub fn from_csr(matrix: &CsMat<f64>, gene_ids: Vec<String>, cell_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_cells) = matrix.shape();
        let mut counts = Array2::zeros((n_genes, n_cells));
        for (&value, (g, c)) in matrix.iter() {
            counts[[g, c]] += value;
        }
        let mut built = Self::new(counts, gene_ids, cell_ids)?;
        built.sparse_origin = true;
        Ok(built)
    }

    /// Get the number of genes
    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    /// Get the number of cells
    pub fn n_cells(&self) -> usize {
        self.counts.ncols()
    }

    /// Get the raw counts as a view
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    /// Whether the matrix was built from a sparse representation
    pub fn is_sparse(&self) -> bool {
        self.sparse_origin
    }

    /// Get counts for a specific gene
    pub fn gene_counts(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    /// Total count per cell (library size)
    pub fn cell_totals(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(1)).map(|col| col.sum()).collect()
    }
}
