//! Index configuration.

use serde::{Deserialize, Serialize};

use crate::distance::{DistanceMetric, MAX_BATCH_SIZE};
use crate::error::{IndexError, Result};

/// Smallest derived maximum cluster size.
pub const MIN_DERIVED_CLUSTER_SIZE: usize = 1000;

/// Tunables for building and maintaining a cluster index.
///
/// # Example
///
/// ```
/// use sparnn::{DistanceMetric, IndexConfig};
///
/// let config = IndexConfig::new(DistanceMetric::JaccardBinary)
///     .with_max_cluster_size(500)
///     .with_seed(7);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Distance metric used at every level of the tree.
    pub metric: DistanceMetric,
    /// Maximum cluster size M. `None` derives `max(sqrt(R), 1000)` from the
    /// initial record count R.
    pub max_cluster_size: Option<usize>,
    /// Reference rows scored per chunk.
    pub search_batch_size: usize,
    /// Children each query is routed to at a NonTerminal node. Higher
    /// values trade speed for recall.
    pub probes: usize,
    /// A Terminal node is rebuilt once its row count exceeds this multiple
    /// of its size at the last (re)build, and never below this multiple of M.
    pub rebuild_factor: f32,
    /// Tombstone fraction at which a Terminal node compacts itself.
    pub compaction_threshold: f32,
    /// Balanced k-means refinement rounds when splitting a node.
    pub kmeans_iterations: usize,
    /// Seed for every random choice made while partitioning.
    pub seed: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            max_cluster_size: None,
            search_batch_size: 50_000,
            probes: 1,
            rebuild_factor: 2.0,
            compaction_threshold: 0.25,
            kmeans_iterations: 5,
            seed: 42,
        }
    }
}

impl IndexConfig {
    /// Default configuration for `metric`.
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            ..Self::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| IndexError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    #[must_use]
    pub fn with_max_cluster_size(mut self, max_cluster_size: usize) -> Self {
        self.max_cluster_size = Some(max_cluster_size);
        self
    }

    #[must_use]
    pub fn with_search_batch_size(mut self, search_batch_size: usize) -> Self {
        self.search_batch_size = search_batch_size;
        self
    }

    #[must_use]
    pub fn with_probes(mut self, probes: usize) -> Self {
        self.probes = probes;
        self
    }

    #[must_use]
    pub fn with_rebuild_factor(mut self, rebuild_factor: f32) -> Self {
        self.rebuild_factor = rebuild_factor;
        self
    }

    #[must_use]
    pub fn with_compaction_threshold(mut self, compaction_threshold: f32) -> Self {
        self.compaction_threshold = compaction_threshold;
        self
    }

    #[must_use]
    pub fn with_kmeans_iterations(mut self, kmeans_iterations: usize) -> Self {
        self.kmeans_iterations = kmeans_iterations;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Maximum cluster size for an initial set of `records` records.
    pub fn resolve_max_cluster_size(&self, records: usize) -> usize {
        self.max_cluster_size
            .unwrap_or_else(|| ((records as f64).sqrt() as usize).max(MIN_DERIVED_CLUSTER_SIZE))
    }

    /// Reject settings the index cannot work with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(IndexError::InvalidConfig(msg.to_string()));

        if matches!(self.max_cluster_size, Some(m) if m < 2) {
            return invalid("max_cluster_size must be at least 2");
        }
        if self.search_batch_size == 0 {
            return invalid("search_batch_size must be at least 1");
        }
        if self.search_batch_size > MAX_BATCH_SIZE {
            return invalid("search_batch_size must fit in 32 bits");
        }
        if self.probes == 0 {
            return invalid("probes must be at least 1");
        }
        if !(self.rebuild_factor > 1.0 && self.rebuild_factor.is_finite()) {
            return invalid("rebuild_factor must be a finite value greater than 1");
        }
        if !(self.compaction_threshold > 0.0 && self.compaction_threshold <= 1.0) {
            return invalid("compaction_threshold must be in (0, 1]");
        }
        Ok(())
    }
}
