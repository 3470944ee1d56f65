//! Depth estimation, depth exponents, and gene routing

mod depth;
mod filter;
mod slope;

pub use depth::{estimate_depth, resolve_depth, DepthInput};
pub use filter::{count_nonzero, route_gene, scale_by_depth, Route, REFERENCE_DEPTH};
pub use slope::{effective_depth, gene_slope, DepthSlope};
