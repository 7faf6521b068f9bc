//! Sparnn - approximate nearest-neighbor search over sparse vectors
//!
//! Vectors are stored as nonzero entries plus a fixed dimension. A tree of
//! balanced k-means clusters narrows each query to a few leaves, and leaves
//! are scanned with batched sparse matrix products under cosine or binary
//! Jaccard distance.

pub mod clustering;
pub mod config;
pub mod distance;
pub mod error;
pub mod index;
pub mod store;
pub mod vector;

// Re-export commonly used types
pub use clustering::{ClusterAssignment, KMeans, Partition};
pub use config::IndexConfig;
pub use distance::{DistanceMetric, DistanceSpace, Element, Neighbor};
pub use error::{IndexError, Result};
pub use index::{ClusterIndex, FoundDataPoint, InsertReport, Level, Record};
pub use store::{IndexStore, IndexStoreBuilder};
pub use vector::SparseVector;
