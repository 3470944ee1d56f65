//! File input and output

mod csv;
mod diagnostics;

pub use self::csv::{read_count_matrix, read_depth, write_depth, write_normalized};
pub use diagnostics::write_diagnostics;
