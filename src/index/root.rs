//! Root of a cluster index tree
//!
//! Owns the set of live identifiers and the shared dimension, so duplicate
//! and dimension checks happen once per batch before anything reaches the
//! nodes below.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::cluster::{ClusterIndex, Level};
use super::record::{split_duplicates, FoundDataPoint, InsertReport, Payload, Record, RecordId};
use super::ClusterParams;
use crate::error::{IndexError, Result};
use crate::vector::sparse::check_dimension;
use crate::vector::SparseVector;

pub struct RootClusterIndex<I, D> {
    tree: Box<ClusterIndex<I, D>>,
    ids: HashSet<I>,
    /// Unknown until the first vector arrives.
    dimension: Option<usize>,
    params: ClusterParams,
}

impl<I: RecordId, D: Payload> RootClusterIndex<I, D> {
    /// Build a tree over `records`. Every identifier must be distinct and
    /// every vector must share one dimension.
    pub fn new(records: Vec<Record<I, D>>, params: ClusterParams, seed: u64) -> Result<Self> {
        let dimension = records.first().map(|r| r.vector.dimension());
        let mut ids = HashSet::with_capacity(records.len());
        for record in &records {
            if let Some(expected) = dimension {
                check_dimension(expected, record.vector.dimension())?;
            }
            if !ids.insert(record.id.clone()) {
                return Err(IndexError::DuplicateId(format!("{:?}", record.id)));
            }
        }

        let size = records.len();
        let tree = ClusterIndex::create(records, params, seed, Level::Nested)?;
        info!(
            records = size,
            max_cluster_size = params.max_cluster_size,
            depth = tree.depth(),
            nodes = tree.node_count(),
            "built cluster index"
        );

        Ok(Self {
            tree: Box::new(tree),
            ids,
            dimension,
            params,
        })
    }

    /// Per query, the `k` nearest live records, nearest first.
    pub fn find_nearest(&self, queries: &[SparseVector], k: usize) -> Result<Vec<Vec<FoundDataPoint<I, D>>>> {
        if let Some(expected) = self.dimension {
            for query in queries {
                check_dimension(expected, query.dimension())?;
            }
        }
        if k == 0 || self.ids.is_empty() {
            return Ok(queries.iter().map(|_| Vec::new()).collect());
        }
        self.tree.find_nearest(queries, k)
    }

    /// Insert every record whose identifier is not already live.
    ///
    /// A vector of the wrong dimension rejects the whole batch.
    pub fn add_batch(&mut self, records: Vec<Record<I, D>>) -> Result<InsertReport<I>> {
        let (accepted, duplicates) = split_duplicates(records, self.dimension, |id| self.ids.contains(id))?;
        if accepted.is_empty() {
            return Ok(InsertReport { inserted: 0, duplicates });
        }

        let inserted = accepted.len();
        self.insert_screened(accepted)?;

        if !duplicates.is_empty() {
            debug!(inserted, duplicates = duplicates.len(), "skipped duplicate ids");
        }
        Ok(InsertReport { inserted, duplicates })
    }

    /// Insert records that already passed duplicate and dimension screening.
    ///
    /// If the tree fails partway, the live-id set is resynchronized with the
    /// records the tree actually holds before the error is returned.
    fn insert_screened(&mut self, records: Vec<Record<I, D>>) -> Result<()> {
        let ids: Vec<I> = records.iter().map(|r| r.id.clone()).collect();
        let params = self.params;
        let outcome = self
            .tree
            .insert(records)
            .and_then(|()| self.tree.rebuild_if_needed(params));

        let tree = &self.tree;
        if self.dimension.is_none() {
            self.dimension = tree.dimension();
        }
        match outcome {
            Ok(rebuilt) => {
                self.ids.extend(ids);
                if rebuilt {
                    debug!(records = self.ids.len(), "rebuilt top-level cluster");
                }
                Ok(())
            }
            Err(err) => {
                self.ids.extend(ids.into_iter().filter(|id| tree.contains(id)));
                self.ids.retain(|id| tree.contains(id));
                warn!(records = self.ids.len(), error = %err, "insert failed, live ids resynchronized");
                Err(err)
            }
        }
    }

    /// Remove the given identifiers, returning how many were live.
    pub fn delete_batch(&mut self, ids: &[I]) -> Result<usize> {
        let mut remaining: HashSet<I> = ids.iter().cloned().collect();
        self.remove(&mut remaining)
    }

    pub(crate) fn remove(&mut self, remaining: &mut HashSet<I>) -> Result<usize> {
        remaining.retain(|id| self.ids.contains(id));
        if remaining.is_empty() {
            return Ok(0);
        }
        for id in remaining.iter() {
            self.ids.remove(id);
        }
        self.tree.remove(remaining)
    }

    pub fn compact(&mut self) -> Result<()> {
        self.tree.compact()
    }

    pub fn contains(&self, id: &I) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tree.tombstone_count()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// The subtree below the root.
    pub fn tree(&self) -> &ClusterIndex<I, D> {
        &self.tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::distance::DistanceMetric;

    fn params(max_cluster_size: usize) -> ClusterParams {
        let config = IndexConfig::new(DistanceMetric::Cosine).with_max_cluster_size(max_cluster_size);
        ClusterParams::resolve(&config, 0)
    }

    fn record(id: u64, dense: &[f32]) -> Record<u64, ()> {
        Record::new(id, (), SparseVector::from_dense(dense).unwrap())
    }

    #[test]
    fn test_failed_insert_keeps_ids_in_step_with_tree() {
        let mut root = RootClusterIndex::<u64, ()>::new(Vec::new(), params(10), 0).unwrap();
        let batch = vec![record(1, &[1.0, 0.0]), record(2, &[0.0, 1.0, 0.0])];

        assert!(matches!(
            root.insert_screened(batch),
            Err(IndexError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert!(root.contains(&1));
        assert!(!root.contains(&2));
        assert_eq!(root.len(), 1);
        assert_eq!(root.len(), root.tree().len());
        assert_eq!(root.dimension(), Some(2));

        // Deleting and reinserting the survivor behaves normally.
        assert_eq!(root.delete_batch(&[1, 2]).unwrap(), 1);
        assert_eq!(root.tree().len(), 0);
        assert_eq!(root.add_batch(vec![record(2, &[0.5, 0.5])]).unwrap().inserted, 1);
        assert_eq!(root.len(), root.tree().len());
    }

    #[test]
    fn test_rejects_duplicate_initial_ids() {
        let records = vec![record(1, &[1.0, 0.0]), record(1, &[0.0, 1.0])];
        assert!(matches!(
            RootClusterIndex::new(records, params(10), 0),
            Err(IndexError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_rejects_mixed_initial_dimensions() {
        let records = vec![record(1, &[1.0, 0.0]), record(2, &[0.0, 1.0, 0.0])];
        assert!(matches!(
            RootClusterIndex::new(records, params(10), 0),
            Err(IndexError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_empty_root_learns_dimension_on_insert() {
        let mut root = RootClusterIndex::<u64, ()>::new(Vec::new(), params(10), 0).unwrap();
        assert_eq!(root.dimension(), None);
        let query = SparseVector::from_dense(&[1.0, 0.0]).unwrap();
        assert!(root.find_nearest(&[query.clone()], 3).unwrap()[0].is_empty());

        let report = root.add_batch(vec![record(5, &[1.0, 0.0])]).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(root.dimension(), Some(2));
        assert_eq!(root.find_nearest(&[query], 3).unwrap()[0][0].id, 5);

        let wrong = SparseVector::from_dense(&[1.0, 0.0, 0.0]).unwrap();
        assert!(root.find_nearest(&[wrong], 1).is_err());
    }

    #[test]
    fn test_zero_k_returns_empty_lists() {
        let root = RootClusterIndex::new(vec![record(1, &[1.0, 0.0])], params(10), 0).unwrap();
        let query = SparseVector::from_dense(&[1.0, 0.0]).unwrap();
        let results = root.find_nearest(&[query.clone(), query], 0).unwrap();
        assert_eq!(results, vec![Vec::new(), Vec::new()]);
    }

    #[test]
    fn test_delete_then_reinsert() {
        let mut root = RootClusterIndex::new(
            vec![record(1, &[1.0, 0.0]), record(2, &[0.0, 1.0])],
            params(10),
            0,
        )
        .unwrap();
        assert_eq!(root.delete_batch(&[1, 3]).unwrap(), 1);
        assert_eq!(root.delete_batch(&[1]).unwrap(), 0);
        assert_eq!(root.len(), 1);

        let report = root.add_batch(vec![record(1, &[1.0, 1.0])]).unwrap();
        assert_eq!(report.inserted, 1);
        assert!(root.contains(&1));

        let query = SparseVector::from_dense(&[1.0, 1.0]).unwrap();
        let results = root.find_nearest(&[query], 1).unwrap();
        assert_eq!(results[0][0].id, 1);
        assert!(results[0][0].distance.abs() < 1e-6);
    }

    #[test]
    fn test_growth_deepens_tree() {
        let mut root = RootClusterIndex::<u64, ()>::new(Vec::new(), params(4), 0).unwrap();
        let batch: Vec<_> = (0..64u64)
            .map(|id| {
                let vector = SparseVector::new(64, vec![(id as u32, 1.0)]).unwrap();
                Record::new(id, (), vector)
            })
            .collect();
        root.add_batch(batch).unwrap();
        assert_eq!(root.len(), 64);
        assert!(root.tree().depth() >= 2);
    }
}
