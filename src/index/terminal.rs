//! Terminal (leaf) cluster index
//!
//! Brute-force batched scan over one distance space. Deletions only mark
//! rows as tombstoned; the space is rewritten on compaction.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::record::{Entry, FoundDataPoint, Payload, Record, RecordId};
use super::ClusterParams;
use crate::distance::DistanceSpace;
use crate::error::Result;
use crate::vector::SparseVector;

pub struct TerminalClusterIndex<I, D> {
    space: DistanceSpace<Entry<I, D>>,
    /// Tombstone flag per row of `space`.
    deleted: Vec<bool>,
    /// Live identifier -> row.
    rows: HashMap<I, usize>,
    params: ClusterParams,
    /// Seed handed to the factory if this node is ever rebuilt.
    seed: u64,
    /// Row count above which the node asks to be rebuilt.
    rebuild_at: usize,
}

impl<I: RecordId, D: Payload> TerminalClusterIndex<I, D> {
    pub fn new(records: Vec<Record<I, D>>, params: ClusterParams, seed: u64) -> Result<Self> {
        let size = records.len();
        let mut rows = HashMap::with_capacity(size);
        let mut vectors = Vec::with_capacity(size);
        let mut entries = Vec::with_capacity(size);
        for (row, record) in records.into_iter().enumerate() {
            rows.insert(record.id.clone(), row);
            vectors.push(record.vector);
            entries.push(Entry {
                id: record.id,
                data: record.data,
            });
        }

        let space = DistanceSpace::new(params.metric, vectors, entries, params.search_batch_size)?;
        debug!(records = size, chunks = space.num_chunks(), "built terminal cluster");

        Ok(Self {
            space,
            deleted: vec![false; size],
            rows,
            params,
            seed,
            rebuild_at: params.rebuild_threshold(size),
        })
    }

    /// Per query, the `k` nearest live records.
    pub fn find_nearest(&self, queries: &[SparseVector], k: usize) -> Result<Vec<Vec<FoundDataPoint<I, D>>>> {
        let neighbors = self.space.nearest(queries, k, |row| self.deleted[row])?;
        Ok(neighbors
            .into_iter()
            .map(|hits| {
                hits.into_iter()
                    .map(|hit| {
                        let entry = self.space.element(hit.row);
                        FoundDataPoint {
                            id: entry.id.clone(),
                            data: entry.data.clone(),
                            vector: self.space.vector(hit.row).clone(),
                            distance: hit.distance,
                        }
                    })
                    .collect()
            })
            .collect())
    }

    /// Append records. Identifiers must not be live anywhere in the tree.
    pub fn insert(&mut self, records: Vec<Record<I, D>>) -> Result<()> {
        for record in records {
            let row = self.space.len();
            self.space.push(
                record.vector,
                Entry {
                    id: record.id.clone(),
                    data: record.data,
                },
            )?;
            self.deleted.push(false);
            self.rows.insert(record.id, row);
        }
        Ok(())
    }

    /// Tombstone every live record whose id is in `remaining`, removing the
    /// matched ids from the set. Returns how many were tombstoned.
    pub fn remove(&mut self, remaining: &mut HashSet<I>) -> Result<usize> {
        let matched: Vec<I> = remaining
            .iter()
            .filter(|id| self.rows.contains_key(*id))
            .cloned()
            .collect();
        for id in &matched {
            remaining.remove(id);
            if let Some(row) = self.rows.remove(id) {
                self.deleted[row] = true;
            }
        }

        if !matched.is_empty() && self.tombstone_ratio() >= self.params.compaction_threshold {
            self.compact()?;
        }
        Ok(matched.len())
    }

    /// Physically drop tombstoned rows.
    pub fn compact(&mut self) -> Result<()> {
        let tombstones = self.tombstone_count();
        if tombstones == 0 {
            return Ok(());
        }

        let records = self.take_live_records()?;
        let live = records.len();
        let rebuild_at = self.rebuild_at;
        *self = Self::new(records, self.params, self.seed)?;
        self.rebuild_at = rebuild_at;
        debug!(live, tombstones, "compacted terminal cluster");
        Ok(())
    }

    /// Move every live record out, leaving this node empty.
    pub fn take_live_records(&mut self) -> Result<Vec<Record<I, D>>> {
        let empty = DistanceSpace::empty(self.params.metric, self.params.search_batch_size)?;
        let (vectors, entries) = std::mem::replace(&mut self.space, empty).into_parts();
        let deleted = std::mem::take(&mut self.deleted);
        self.rows.clear();

        Ok(vectors
            .into_iter()
            .zip(entries)
            .zip(deleted)
            .filter(|(_, deleted)| !deleted)
            .map(|((vector, entry), _)| Record::new(entry.id, entry.data, vector))
            .collect())
    }

    /// True once enough rows were appended since the last build.
    pub fn needs_rebuild(&self) -> bool {
        self.space.len() > self.rebuild_at
    }

    pub fn contains(&self, id: &I) -> bool {
        self.rows.contains_key(id)
    }

    /// Live records.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows held, tombstones included.
    pub fn physical_len(&self) -> usize {
        self.space.len()
    }

    pub fn tombstone_count(&self) -> usize {
        self.space.len() - self.rows.len()
    }

    fn tombstone_ratio(&self) -> f32 {
        if self.space.is_empty() {
            return 0.0;
        }
        self.tombstone_count() as f32 / self.space.len() as f32
    }

    pub fn dimension(&self) -> Option<usize> {
        self.space.dimension()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}
