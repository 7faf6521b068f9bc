//! Error types for index construction, mutation, and search.

use thiserror::Error;

/// Errors that can occur in sparse vector and index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Two vectors of different total dimension were combined or compared.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The expected dimension.
        expected: usize,
        /// The actual dimension.
        actual: usize,
    },

    /// A sparse entry position lies outside the vector's dimension.
    #[error("index out of bounds: {index} >= {dimension}")]
    IndexOutOfBounds {
        /// The offending position.
        index: usize,
        /// The vector dimension (exclusive upper bound).
        dimension: usize,
    },

    /// Invalid numeric value (NaN, infinity, zero divisor).
    #[error("invalid value at index {index}: {value} - {reason}")]
    InvalidValue {
        /// Position of the value, or 0 for scalar operands.
        index: usize,
        /// The invalid value.
        value: f32,
        /// Why the value was rejected.
        reason: &'static str,
    },

    /// The same position was given twice when building a sparse vector.
    #[error("duplicate index {0} in sparse vector")]
    DuplicateIndex(u32),

    /// Stored vector fields do not describe a valid sparse vector.
    #[error("malformed sparse vector: {0}")]
    MalformedVector(String),

    /// The same record identifier appeared twice in an initial build.
    #[error("duplicate record id {0} in initial records")]
    DuplicateId(String),

    /// A distance space was given different numbers of vectors and elements.
    #[error("length mismatch: {vectors} vectors but {elements} elements")]
    LengthMismatch {
        /// Number of vectors supplied.
        vectors: usize,
        /// Number of elements supplied.
        elements: usize,
    },

    /// Metric name did not match any supported metric.
    #[error("unknown distance metric: {0}")]
    UnknownMetric(String),

    /// Algorithm name did not match any supported index algorithm.
    #[error("unknown index algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Configuration rejected at build time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Lock poisoned by a panic in a writer.
    ///
    /// Unrecoverable; the index store must be rebuilt.
    #[error("index corrupted: lock poisoned due to prior panic in another thread")]
    LockPoisoned,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;
