//! Index store facade
//!
//! Binds caller identifiers and payloads to vectors and guards the cluster
//! tree with a read/write lock: searches share the read side, mutations
//! take the write side.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{info, warn};

use crate::config::IndexConfig;
use crate::distance::DistanceMetric;
use crate::error::{IndexError, Result};
use crate::index::{ClusterIndex, ClusterParams, FoundDataPoint, InsertReport, Level, Payload, Record, RecordId};
use crate::vector::SparseVector;

/// Name of the only supported index algorithm.
pub const ALGORITHM: &str = "Sparnn";

/// A searchable, mutable collection of identified sparse vectors.
pub struct IndexStore<I, D> {
    config: IndexConfig,
    max_cluster_size: usize,
    root: RwLock<ClusterIndex<I, D>>,
}

impl<I: RecordId, D: Payload> IndexStore<I, D> {
    fn read(&self) -> Result<RwLockReadGuard<'_, ClusterIndex<I, D>>> {
        self.root.read().map_err(|_| IndexError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, ClusterIndex<I, D>>> {
        self.root.write().map_err(|_| IndexError::LockPoisoned)
    }

    /// Number of live records.
    pub fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Insert records, skipping identifiers that are already live.
    pub fn add_batch(&self, records: Vec<Record<I, D>>) -> Result<InsertReport<I>> {
        self.write()?.add_batch(records)
    }

    /// Delete records by identifier, returning how many were live.
    pub fn delete_batch(&self, ids: &[I]) -> Result<usize> {
        self.write()?.delete_batch(ids)
    }

    /// For every query, up to `limit` records ordered by ascending
    /// distance, ties broken by identifier. Results are in query order.
    pub fn find_nearest(&self, queries: &[SparseVector], limit: usize) -> Result<Vec<Vec<FoundDataPoint<I, D>>>> {
        self.read()?.find_nearest(queries, limit)
    }

    /// Drop every tombstoned row from the tree.
    pub fn compact(&self) -> Result<()> {
        self.write()?.compact()
    }

    pub fn depth(&self) -> Result<usize> {
        Ok(self.read()?.depth())
    }

    pub fn node_count(&self) -> Result<usize> {
        Ok(self.read()?.node_count())
    }

    pub fn tombstone_count(&self) -> Result<usize> {
        Ok(self.read()?.tombstone_count())
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Human-readable summary of the algorithm and its settings.
    pub fn description(&self) -> String {
        format!(
            "{ALGORITHM} index (metric: {}, max cluster size: {}, search batch size: {}, probes: {})",
            self.config.metric, self.max_cluster_size, self.config.search_batch_size, self.config.probes
        )
    }
}

/// Builds [`IndexStore`]s from configurations or algorithm names.
pub struct IndexStoreBuilder;

impl IndexStoreBuilder {
    /// Build a store over caller-identified records.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration, a repeated identifier, or
    /// vectors of differing dimension.
    pub fn build<I: RecordId, D: Payload>(config: IndexConfig, records: Vec<Record<I, D>>) -> Result<IndexStore<I, D>> {
        config.validate()?;
        if records.is_empty() {
            warn!("building index store with no initial records");
        }

        let params = ClusterParams::resolve(&config, records.len());
        let root = ClusterIndex::create(records, params, config.seed, Level::Top)?;
        let store = IndexStore {
            config,
            max_cluster_size: params.max_cluster_size,
            root: RwLock::new(root),
        };
        info!(description = %store.description(), "index store ready");
        Ok(store)
    }

    /// Build a store named `"<algorithm>.<metric>"` over raw vectors.
    ///
    /// Each vector's position in `raw_vectors` becomes its identifier and
    /// the payload is empty.
    ///
    /// ```
    /// use sparnn::{IndexStoreBuilder, SparseVector};
    ///
    /// let raw: Vec<Vec<Option<f32>>> = vec![vec![Some(1.0), None], vec![None, Some(2.0)]];
    /// let store = IndexStoreBuilder::build_index_store("Sparnn.Cosine", raw, |v| SparseVector::from_optional(&v))
    ///     .unwrap();
    /// assert_eq!(store.count().unwrap(), 2);
    /// ```
    pub fn build_index_store<R, F>(name: &str, raw_vectors: Vec<R>, convert: F) -> Result<IndexStore<u64, ()>>
    where
        F: Fn(R) -> Result<SparseVector>,
    {
        let metric = parse_name(name)?;
        let records = raw_vectors
            .into_iter()
            .enumerate()
            .map(|(position, raw)| Ok(Record::new(position as u64, (), convert(raw)?)))
            .collect::<Result<Vec<_>>>()?;
        Self::build(IndexConfig::new(metric), records)
    }
}

/// Split `"<algorithm>.<metric>"` and resolve the metric.
fn parse_name(name: &str) -> Result<DistanceMetric> {
    let (algorithm, metric) = name
        .split_once('.')
        .ok_or_else(|| IndexError::UnknownAlgorithm(name.to_string()))?;
    if !algorithm.eq_ignore_ascii_case(ALGORITHM) {
        return Err(IndexError::UnknownAlgorithm(algorithm.to_string()));
    }
    metric.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name() {
        assert_eq!(parse_name("Sparnn.Cosine").unwrap(), DistanceMetric::Cosine);
        assert_eq!(parse_name("sparnn.jaccardbinary").unwrap(), DistanceMetric::JaccardBinary);
        assert!(matches!(parse_name("Faiss.Cosine"), Err(IndexError::UnknownAlgorithm(_))));
        assert!(matches!(parse_name("Sparnn"), Err(IndexError::UnknownAlgorithm(_))));
        assert!(matches!(parse_name("Sparnn.L2"), Err(IndexError::UnknownMetric(_))));
    }

    #[test]
    fn test_description() {
        let store = IndexStoreBuilder::build::<u64, ()>(IndexConfig::default(), Vec::new()).unwrap();
        assert_eq!(
            store.description(),
            "Sparnn index (metric: Cosine, max cluster size: 1000, search batch size: 50000, probes: 1)"
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = IndexConfig::default().with_probes(0);
        assert!(matches!(
            IndexStoreBuilder::build::<u64, ()>(config, Vec::new()),
            Err(IndexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_conversion_errors_propagate() {
        let raw = vec![vec![Some(1.0)], vec![Some(f32::NAN)]];
        let result = IndexStoreBuilder::build_index_store("Sparnn.Cosine", raw, |v| SparseVector::from_optional(&v));
        assert!(matches!(result, Err(IndexError::InvalidValue { .. })));
    }
}
