//! NonTerminal cluster index
//!
//! Splits its records into near-equal groups with balanced k-means and
//! builds one child per group through the factory. A coarse distance space
//! over the group centroids routes every query to its `probes` nearest
//! non-empty children, widened to further children in centroid order until
//! the routed children hold at least `k` live records. Only routed children
//! are searched, so results are approximate once the tree has more than one
//! level, but a query never gets fewer than `min(k, live)` results.

use std::collections::HashSet;

use rayon::prelude::*;
use tracing::{debug, info};

use super::cluster::{ClusterIndex, Level};
use super::record::{FoundDataPoint, Payload, Record, RecordId};
use super::ClusterParams;
use crate::clustering::KMeans;
use crate::distance::heap::{Ranked, TopK};
use crate::distance::DistanceSpace;
use crate::error::Result;
use crate::vector::SparseVector;

pub struct NonTerminalClusterIndex<I, D> {
    /// Centroid of each child; the element is the child's position.
    routes: DistanceSpace<usize>,
    children: Vec<ClusterIndex<I, D>>,
    params: ClusterParams,
}

impl<I: RecordId, D: Payload> NonTerminalClusterIndex<I, D> {
    pub fn new(records: Vec<Record<I, D>>, params: ClusterParams, seed: u64) -> Result<Self> {
        let size = records.len();
        let k = size
            .div_ceil(params.max_cluster_size)
            .clamp(2, size.max(2));

        let mut vectors = Vec::with_capacity(size);
        let mut rest = Vec::with_capacity(size);
        for record in records {
            vectors.push(record.vector);
            rest.push(Some((record.id, record.data)));
        }

        let partition = KMeans::new(k, params.metric)
            .with_seed(seed)
            .with_max_iterations(params.kmeans_iterations)
            .with_batch_size(params.search_batch_size)
            .partition(&vectors)?;

        let mut vectors: Vec<Option<SparseVector>> = vectors.into_iter().map(Some).collect();
        let groups: Vec<Vec<Record<I, D>>> = partition
            .groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .filter_map(|&i| {
                        let vector = vectors[i].take()?;
                        let (id, data) = rest[i].take()?;
                        Some(Record::new(id, data, vector))
                    })
                    .collect()
            })
            .collect();

        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        info!(
            records = size,
            clusters = groups.len(),
            min = sizes.iter().min().copied().unwrap_or(0),
            max = sizes.iter().max().copied().unwrap_or(0),
            "partitioned non-terminal cluster"
        );

        let children = groups
            .into_par_iter()
            .enumerate()
            .map(|(i, group)| ClusterIndex::create(group, params, child_seed(seed, i), Level::Nested))
            .collect::<Result<Vec<_>>>()?;

        let positions = (0..children.len()).collect();
        let routes = DistanceSpace::new(params.metric, partition.centroids, positions, params.search_batch_size)?;

        Ok(Self {
            routes,
            children,
            params,
        })
    }

    /// Per query, the `k` nearest live records among the routed children.
    pub fn find_nearest(&self, queries: &[SparseVector], k: usize) -> Result<Vec<Vec<FoundDataPoint<I, D>>>> {
        let routing = self.route(queries, k)?;

        // Batch queries per child so each child scores once.
        let mut batches: Vec<Vec<usize>> = vec![Vec::new(); self.children.len()];
        for (query, children) in routing.iter().enumerate() {
            for &child in children {
                batches[child].push(query);
            }
        }

        let answers = self
            .children
            .par_iter()
            .zip(batches.par_iter())
            .filter(|(_, batch)| !batch.is_empty())
            .map(|(child, batch)| {
                let sub_queries: Vec<SparseVector> = batch.iter().map(|&q| queries[q].clone()).collect();
                child.find_nearest(&sub_queries, k).map(|hits| (batch, hits))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut merged: Vec<TopK<I, FoundDataPoint<I, D>>> = queries.iter().map(|_| TopK::new(k)).collect();
        for (batch, hits) in answers {
            for (&query, list) in batch.iter().zip(hits) {
                for hit in list {
                    merged[query].push(Ranked {
                        distance: hit.distance,
                        key: hit.id.clone(),
                        item: hit,
                    });
                }
            }
        }

        Ok(merged
            .into_iter()
            .map(|top| top.into_sorted().into_iter().map(|ranked| ranked.item).collect())
            .collect())
    }

    /// Children each query is sent to, nearest first: at least the `probes`
    /// nearest holding a live record, then more until they hold `k` records.
    fn route(&self, queries: &[SparseVector], k: usize) -> Result<Vec<Vec<usize>>> {
        let sizes: Vec<usize> = self.children.iter().map(ClusterIndex::len).collect();
        let probes = self.params.probes;

        let ranked = self
            .routes
            .nearest(queries, self.children.len(), |row| sizes[*self.routes.element(row)] == 0)?;
        Ok(ranked
            .into_iter()
            .map(|hits| {
                let mut chosen = Vec::with_capacity(probes);
                let mut reachable = 0;
                for hit in hits {
                    if chosen.len() >= probes && reachable >= k {
                        break;
                    }
                    let child = *self.routes.element(hit.row);
                    reachable += sizes[child];
                    chosen.push(child);
                }
                chosen
            })
            .collect())
    }

    /// Route each record to its nearest child and insert it there.
    pub fn insert(&mut self, records: Vec<Record<I, D>>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let vectors: Vec<SparseVector> = records.iter().map(|r| r.vector.clone()).collect();
        let nearest = self.routes.nearest(&vectors, 1, |_| false)?;

        let mut batches: Vec<Vec<Record<I, D>>> = (0..self.children.len()).map(|_| Vec::new()).collect();
        for (record, hits) in records.into_iter().zip(nearest) {
            let child = hits.first().map_or(0, |hit| *self.routes.element(hit.row));
            batches[child].push(record);
        }

        for (child, batch) in self.children.iter_mut().zip(batches) {
            if batch.is_empty() {
                continue;
            }
            let added = batch.len();
            child.insert(batch)?;
            if child.rebuild_if_needed(self.params)? {
                debug!(added, "rebuilt child after insert");
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, remaining: &mut HashSet<I>) -> Result<usize> {
        let mut removed = 0;
        for child in &mut self.children {
            if remaining.is_empty() {
                break;
            }
            removed += child.remove(remaining)?;
        }
        Ok(removed)
    }

    pub fn compact(&mut self) -> Result<()> {
        self.children.iter_mut().try_for_each(ClusterIndex::compact)
    }

    pub fn contains(&self, id: &I) -> bool {
        self.children.iter().any(|child| child.contains(id))
    }

    pub fn children(&self) -> &[ClusterIndex<I, D>] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.iter().map(ClusterIndex::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.children.iter().all(ClusterIndex::is_empty)
    }

    pub fn dimension(&self) -> Option<usize> {
        self.routes.dimension()
    }
}

/// Deterministic, well-spread seed for the `index`-th child.
fn child_seed(seed: u64, index: usize) -> u64 {
    let mut z = seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
