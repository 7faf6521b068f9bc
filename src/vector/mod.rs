//! Sparse vector model and vector algebra.

pub mod sparse;

pub use sparse::SparseVector;
