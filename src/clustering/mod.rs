//! Clustering algorithms for building cluster index trees
//!
//! Provides implementations of:
//! - Balanced k-means with seeded k-means++ initialization

pub mod kmeans;

pub use kmeans::{ClusterAssignment, KMeans, Partition};
