//! Cluster index node kinds and the recursive factory that picks between them.

use std::collections::HashSet;

use tracing::info;

use super::non_terminal::NonTerminalClusterIndex;
use super::record::{split_duplicates, FoundDataPoint, InsertReport, Payload, Record, RecordId};
use super::root::RootClusterIndex;
use super::terminal::TerminalClusterIndex;
use super::ClusterParams;
use crate::error::Result;
use crate::vector::SparseVector;

/// Above this many `log_M(R)` levels a node is split instead of scanned.
pub const LEVELS_THRESHOLD: f64 = 1.4;

/// Whether the factory is being called for the top of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// First call: wrap the tree in a Root node.
    Top,
    /// Any call below the root.
    Nested,
}

/// One node of the cluster index tree.
pub enum ClusterIndex<I, D> {
    Root(RootClusterIndex<I, D>),
    NonTerminal(NonTerminalClusterIndex<I, D>),
    Terminal(TerminalClusterIndex<I, D>),
}

/// `log_M(R)`; zero for fewer than two records.
pub fn levels(records: usize, max_cluster_size: usize) -> f64 {
    if records < 2 || max_cluster_size < 2 {
        return 0.0;
    }
    (records as f64).ln() / (max_cluster_size as f64).ln()
}

impl<I: RecordId, D: Payload> ClusterIndex<I, D> {
    /// Build a node over `records`.
    ///
    /// At [`Level::Top`] the result is always a Root, which builds its
    /// subtree by calling back with [`Level::Nested`]. Below the root a node
    /// with more than [`LEVELS_THRESHOLD`] levels of records becomes a
    /// NonTerminal and anything smaller a Terminal.
    pub fn create(records: Vec<Record<I, D>>, params: ClusterParams, seed: u64, level: Level) -> Result<Self> {
        match level {
            Level::Top => Ok(ClusterIndex::Root(RootClusterIndex::new(records, params, seed)?)),
            Level::Nested => {
                if levels(records.len(), params.max_cluster_size) > LEVELS_THRESHOLD {
                    Ok(ClusterIndex::NonTerminal(NonTerminalClusterIndex::new(records, params, seed)?))
                } else {
                    Ok(ClusterIndex::Terminal(TerminalClusterIndex::new(records, params, seed)?))
                }
            }
        }
    }

    /// Per query, up to `k` results in ascending distance order, ties broken
    /// by ascending identifier.
    pub fn find_nearest(&self, queries: &[SparseVector], k: usize) -> Result<Vec<Vec<FoundDataPoint<I, D>>>> {
        match self {
            ClusterIndex::Root(root) => root.find_nearest(queries, k),
            ClusterIndex::NonTerminal(node) => node.find_nearest(queries, k),
            ClusterIndex::Terminal(node) => node.find_nearest(queries, k),
        }
    }

    /// Insert a batch, reporting identifiers that are already live (or
    /// repeated within the batch) instead of inserting them.
    pub fn add_batch(&mut self, records: Vec<Record<I, D>>) -> Result<InsertReport<I>> {
        if let ClusterIndex::Root(root) = self {
            return root.add_batch(records);
        }

        let (accepted, duplicates) = split_duplicates(records, self.dimension(), |id| self.contains(id))?;
        let inserted = accepted.len();
        self.insert(accepted)?;
        Ok(InsertReport { inserted, duplicates })
    }

    /// Tombstone the given identifiers; unknown ones are ignored.
    /// Returns the number of live records removed.
    pub fn delete_batch(&mut self, ids: &[I]) -> Result<usize> {
        if let ClusterIndex::Root(root) = self {
            return root.delete_batch(ids);
        }

        let mut remaining: HashSet<I> = ids.iter().cloned().collect();
        self.remove(&mut remaining)
    }

    /// Append records without duplicate checks. A Terminal that grows past
    /// its threshold is left for the caller to rebuild.
    pub(crate) fn insert(&mut self, records: Vec<Record<I, D>>) -> Result<()> {
        match self {
            ClusterIndex::Root(root) => root.add_batch(records).map(|_| ()),
            ClusterIndex::NonTerminal(node) => node.insert(records),
            ClusterIndex::Terminal(node) => node.insert(records),
        }
    }

    pub(crate) fn remove(&mut self, remaining: &mut HashSet<I>) -> Result<usize> {
        match self {
            ClusterIndex::Root(root) => root.remove(remaining),
            ClusterIndex::NonTerminal(node) => node.remove(remaining),
            ClusterIndex::Terminal(node) => node.remove(remaining),
        }
    }

    /// Rebuild an oversized Terminal through the factory, which may turn it
    /// into a NonTerminal. Returns whether a rebuild happened.
    pub(crate) fn rebuild_if_needed(&mut self, params: ClusterParams) -> Result<bool> {
        let ClusterIndex::Terminal(node) = self else {
            return Ok(false);
        };
        if !node.needs_rebuild() {
            return Ok(false);
        }

        let physical = node.physical_len();
        let seed = node.seed();
        let records = node.take_live_records()?;
        let live = records.len();
        *self = ClusterIndex::create(records, params, seed, Level::Nested)?;
        info!(
            physical,
            live,
            kind = self.kind(),
            "rebuilt terminal cluster"
        );
        Ok(true)
    }

    /// Physically drop tombstoned records everywhere below this node.
    pub fn compact(&mut self) -> Result<()> {
        match self {
            ClusterIndex::Root(root) => root.compact(),
            ClusterIndex::NonTerminal(node) => node.compact(),
            ClusterIndex::Terminal(node) => node.compact(),
        }
    }

    /// True if `id` is a live record below this node.
    pub fn contains(&self, id: &I) -> bool {
        match self {
            ClusterIndex::Root(root) => root.contains(id),
            ClusterIndex::NonTerminal(node) => node.contains(id),
            ClusterIndex::Terminal(node) => node.contains(id),
        }
    }

    /// Live record count.
    pub fn len(&self) -> usize {
        match self {
            ClusterIndex::Root(root) => root.len(),
            ClusterIndex::NonTerminal(node) => node.len(),
            ClusterIndex::Terminal(node) => node.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ClusterIndex::Root(root) => root.is_empty(),
            ClusterIndex::NonTerminal(node) => node.is_empty(),
            ClusterIndex::Terminal(node) => node.is_empty(),
        }
    }

    /// Tombstoned records not yet compacted away.
    pub fn tombstone_count(&self) -> usize {
        match self {
            ClusterIndex::Root(root) => root.tombstone_count(),
            ClusterIndex::NonTerminal(node) => node.children().iter().map(ClusterIndex::tombstone_count).sum(),
            ClusterIndex::Terminal(node) => node.tombstone_count(),
        }
    }

    /// Dimension shared by every vector in the subtree, if known.
    pub fn dimension(&self) -> Option<usize> {
        match self {
            ClusterIndex::Root(root) => root.dimension(),
            ClusterIndex::NonTerminal(node) => node.dimension(),
            ClusterIndex::Terminal(node) => node.dimension(),
        }
    }

    /// Nodes on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        match self {
            ClusterIndex::Root(root) => 1 + root.tree().depth(),
            ClusterIndex::NonTerminal(node) => {
                1 + node.children().iter().map(ClusterIndex::depth).max().unwrap_or(0)
            }
            ClusterIndex::Terminal(_) => 1,
        }
    }

    /// Total number of nodes in the subtree.
    pub fn node_count(&self) -> usize {
        match self {
            ClusterIndex::Root(root) => 1 + root.tree().node_count(),
            ClusterIndex::NonTerminal(node) => {
                1 + node.children().iter().map(ClusterIndex::node_count).sum::<usize>()
            }
            ClusterIndex::Terminal(_) => 1,
        }
    }

    /// Short name of the node kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterIndex::Root(_) => "root",
            ClusterIndex::NonTerminal(_) => "non-terminal",
            ClusterIndex::Terminal(_) => "terminal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::distance::DistanceMetric;

    fn records(n: u32, dimension: u32) -> Vec<Record<u32, ()>> {
        (0..n)
            .map(|id| {
                let vector = SparseVector::new(
                    dimension as usize,
                    vec![(id % dimension, 1.0), ((id * 7 + 1) % dimension, 0.5)],
                )
                .unwrap_or_else(|_| SparseVector::new(dimension as usize, vec![(id % dimension, 1.0)]).unwrap());
                Record::new(id, (), vector)
            })
            .collect()
    }

    fn params(max_cluster_size: usize) -> ClusterParams {
        let config = IndexConfig::new(DistanceMetric::Cosine).with_max_cluster_size(max_cluster_size);
        ClusterParams::resolve(&config, 0)
    }

    #[test]
    fn test_levels() {
        assert_eq!(levels(1, 1000), 0.0);
        assert!((levels(1000, 1000) - 1.0).abs() < 1e-12);
        assert!((levels(1_000_000, 1000) - 2.0).abs() < 1e-12);
        assert!(levels(20_000, 1000) > LEVELS_THRESHOLD);
        assert!(levels(10_000, 1000) < LEVELS_THRESHOLD);
    }

    #[test]
    fn test_top_level_is_root() {
        let index = ClusterIndex::create(records(4, 3), params(1000), 0, Level::Top).unwrap();
        assert_eq!(index.kind(), "root");
        assert_eq!(index.depth(), 2);
        assert_eq!(index.node_count(), 2);
    }

    #[test]
    fn test_nested_picks_kind_by_size() {
        let small = ClusterIndex::create(records(50, 64), params(10), 0, Level::Nested).unwrap();
        // log_10(50) = 1.70 > 1.4
        assert_eq!(small.kind(), "non-terminal");
        assert_eq!(small.len(), 50);
        assert_eq!(small.depth(), 2);

        let tiny = ClusterIndex::create(records(20, 64), params(10), 0, Level::Nested).unwrap();
        // log_10(20) = 1.30
        assert_eq!(tiny.kind(), "terminal");
    }

    #[test]
    fn test_larger_ratio_never_shallower() {
        let mut previous = 0;
        for n in [5, 20, 60, 200] {
            let index = ClusterIndex::create(records(n, 64), params(8), 1, Level::Top).unwrap();
            assert!(index.depth() >= previous, "depth shrank at n = {n}");
            previous = index.depth();
        }
    }

    #[test]
    fn test_terminal_grows_into_non_terminal() {
        let mut index = ClusterIndex::create(records(10, 64), params(10), 0, Level::Nested).unwrap();
        assert_eq!(index.kind(), "terminal");

        let extra: Vec<_> = records(200, 64).into_iter().skip(10).collect();
        let report = index.add_batch(extra).unwrap();
        assert_eq!(report.inserted, 190);
        assert!(report.duplicates.is_empty());

        // 200 rows > 2 x 10 triggers a rebuild; log_10(200) > 1.4 splits it.
        assert!(index.rebuild_if_needed(params(10)).unwrap());
        assert_eq!(index.kind(), "non-terminal");
        assert_eq!(index.len(), 200);
    }

    #[test]
    fn test_nested_add_and_delete_batches() {
        let mut index = ClusterIndex::create(records(30, 64), params(10), 0, Level::Nested).unwrap();
        let again = records(3, 64);
        let report = index.add_batch(again).unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.duplicates, vec![0, 1, 2]);

        assert_eq!(index.delete_batch(&[0, 1, 500]).unwrap(), 2);
        assert_eq!(index.delete_batch(&[0]).unwrap(), 0);
        assert_eq!(index.len(), 28);
        assert!(!index.contains(&0));
    }
}
