//! Error types for rust_dino

use thiserror::Error;

/// Main error type for normalization operations
#[derive(Error, Debug)]
pub enum DinoError {
    /// Input carries no information to normalize against (all-zero depth, empty cells)
    #[error("Degenerate input: {reason}")]
    DegenerateInput { reason: String },

    /// Invalid parameter, reported before any per-gene work is dispatched
    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid depth vector: {reason}")]
    InvalidDepth { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    /// Gene-local fit failure. The pipeline degrades the gene to depth scaling
    /// instead of surfacing this.
    #[error("Numerical instability in {operation}: {details}")]
    NumericalInstability { operation: String, details: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },
}

/// Result type alias for normalization operations
pub type Result<T> = std::result::Result<T, DinoError>;
