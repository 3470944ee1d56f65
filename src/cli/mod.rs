//! Command-line interface for rust_dino

use clap::{Args, Parser, Subcommand};

use crate::error::{DinoError, Result};
use crate::mixture::EmParams;
use crate::normalization::DepthSlope;
use crate::pipeline::NormalizeParams;

#[derive(Parser)]
#[command(name = "rust_dino")]
#[command(version)]
#[command(about = "Depth normalization of single-cell counts by Gamma-Poisson mixture resampling")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Normalize a count matrix
    #[command(
        about = "Normalize a count matrix",
        long_about = "Normalize a count matrix\n\n\
            Genes with enough non-zero cells are fitted with a Gamma-Poisson mixture\n\
            and every cell is resampled from its posterior latent expression. Sparse\n\
            genes are divided by depth.",
        after_long_help = "\
Examples:
  # Depth estimated from cell totals, reproducible output
  rust_dino normalize -c counts.tsv -o normalized.tsv --seed 1

  # Supplied log-scale size factors, 8 workers, diagnostics
  rust_dino normalize -c counts.tsv --depth sf.tsv --log-depth -w 8 \\
    --diagnostics fits.json

  # Gene-specific depth exponent, outputs rounded to 3 decimals
  rust_dino normalize -c counts.tsv --estimate-slope --precision 3"
    )]
    Normalize(NormalizeArgs),

    /// Estimate per-cell depth only
    #[command(
        long_about = "Estimate per-cell depth.\n\n\
            Writes each cell's total count divided by the median cell total.",
        after_long_help = "\
Examples:
  rust_dino depth -c counts.tsv -o depth.tsv"
    )]
    Depth {
        /// Path to count matrix CSV/TSV file
        #[arg(short, long)]
        counts: String,

        /// Output file path [default: depth.tsv]
        #[arg(short, long, default_value = "depth.tsv")]
        output: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct NormalizeArgs {
    /// Path to count matrix CSV/TSV file
    #[arg(short, long,
        long_help = "Path to count matrix file.\n\
            Format: header row of cell IDs, then one row per gene with the gene ID\n\
            first. CSV and TSV are auto-detected.")]
    pub counts: String,

    /// Output file path [default: normalized.tsv]
    #[arg(short, long, default_value = "normalized.tsv")]
    pub output: String,

    /// Per-cell depth file (cell ID, value)
    #[arg(long,
        long_help = "Per-cell depth to normalize against instead of the estimate.\n\
            Format: two columns, cell ID and value; an optional header row is skipped.\n\
            Every cell of the count matrix must appear.")]
    pub depth: Option<String>,

    /// Depth file holds natural-log values
    #[arg(long)]
    pub log_depth: bool,

    /// Minimum non-zero cells for mixture fitting [default: 10]
    #[arg(long, default_value = "10")]
    pub min_nonzero: usize,

    /// Maximum mixture components [default: 100]
    #[arg(long, default_value = "100")]
    pub max_components: usize,

    /// Concentration γ [default: 15]
    #[arg(long, default_value = "15",
        long_help = "Concentration of the resampling posterior.\n\
            Larger values pull outputs toward count / depth.")]
    pub concentration: f64,

    /// Worker threads (0 = all cores) [default: 2]
    #[arg(short, long, default_value = "2")]
    pub workers: usize,

    /// Random seed for reproducible output
    #[arg(long)]
    pub seed: Option<u64>,

    /// Maximum EM cycles per gene [default: 1000]
    #[arg(long, default_value = "1000")]
    pub max_iter: usize,

    /// Relative log-likelihood tolerance [default: 1e-6]
    #[arg(long, default_value = "1e-6")]
    pub tol: f64,

    /// Disable squared extrapolation between EM iterates
    #[arg(long)]
    pub no_acceleration: bool,

    /// Fit each gene on at most this many cells (0 = all) [default: 10000]
    #[arg(long, default_value = "10000")]
    pub max_fit_cells: usize,

    /// Estimate a per-gene depth exponent
    #[arg(long,
        long_help = "Normalize each gene against depth^b, with b the median regression\n\
            slope of log count on log depth over its non-zero cells, clamped to\n\
            [--slope-min, --slope-max].")]
    pub estimate_slope: bool,

    /// Lower bound of estimated slopes [default: 0.5]
    #[arg(long, default_value = "0.5")]
    pub slope_min: f64,

    /// Upper bound of estimated slopes [default: 2.0]
    #[arg(long, default_value = "2.0")]
    pub slope_max: f64,

    /// Round outputs to this many decimals (at most 15)
    #[arg(long)]
    pub precision: Option<u32>,

    /// Write per-gene fit diagnostics (JSON) to this path
    #[arg(long)]
    pub diagnostics: Option<String>,
}

impl NormalizeArgs {
    /// Validated parameters for the pipeline
    pub fn to_params(&self) -> Result<NormalizeParams> {
        let params = NormalizeParams {
            min_nonzero: self.min_nonzero,
            max_components: self.max_components,
            concentration: self.concentration,
            workers: self.workers,
            seed: self.seed,
            em: EmParams {
                max_iter: self.max_iter,
                tol: self.tol,
                accelerate: !self.no_acceleration,
            },
            max_fit_cells: (self.max_fit_cells > 0).then_some(self.max_fit_cells),
            slope: if self.estimate_slope {
                DepthSlope::Estimated {
                    min: self.slope_min,
                    max: self.slope_max,
                }
            } else {
                DepthSlope::default()
            },
            precision: self.precision,
        };
        params.validate()?;
        if self.log_depth && self.depth.is_none() {
            return Err(DinoError::InvalidInput {
                reason: "--log-depth requires --depth".to_string(),
            });
        }
        Ok(params)
    }
}
