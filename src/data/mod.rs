//! Input and output matrices

mod count_matrix;
mod normalized;

pub use count_matrix::CountMatrix;
pub use normalized::NormalizedMatrix;
