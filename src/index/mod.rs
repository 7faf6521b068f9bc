//! Hierarchical cluster index
//!
//! A tree of Root, NonTerminal and Terminal nodes. NonTerminal nodes
//! partition their records with balanced k-means and route queries to the
//! nearest children; Terminal nodes brute-force scan a batched distance
//! space.

pub mod cluster;
pub mod non_terminal;
pub mod record;
pub mod root;
pub mod terminal;

pub use cluster::{ClusterIndex, Level, LEVELS_THRESHOLD};
pub use non_terminal::NonTerminalClusterIndex;
pub use record::{FoundDataPoint, InsertReport, Payload, Record, RecordId};
pub use root::RootClusterIndex;
pub use terminal::TerminalClusterIndex;

use crate::config::IndexConfig;
use crate::distance::DistanceMetric;

/// Settings every node of one tree shares, fixed when the tree is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterParams {
    pub metric: DistanceMetric,
    pub max_cluster_size: usize,
    pub search_batch_size: usize,
    pub probes: usize,
    pub rebuild_factor: f32,
    pub compaction_threshold: f32,
    pub kmeans_iterations: usize,
}

impl ClusterParams {
    /// Fix the maximum cluster size for a tree built over `records` records.
    pub fn resolve(config: &IndexConfig, records: usize) -> Self {
        Self {
            metric: config.metric,
            max_cluster_size: config.resolve_max_cluster_size(records),
            search_batch_size: config.search_batch_size,
            probes: config.probes,
            rebuild_factor: config.rebuild_factor,
            compaction_threshold: config.compaction_threshold,
            kmeans_iterations: config.kmeans_iterations,
        }
    }

    /// Row count past which a Terminal built over `size` records is rebuilt.
    pub fn rebuild_threshold(&self, size: usize) -> usize {
        let factor = f64::from(self.rebuild_factor);
        let floor = (factor * self.max_cluster_size as f64).ceil() as usize;
        let grown = (factor * size as f64).ceil() as usize;
        floor.max(grown)
    }
}
