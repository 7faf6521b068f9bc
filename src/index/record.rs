//! Records stored in the cluster index and the points returned by searches.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

use crate::distance::Element;
use crate::error::Result;
use crate::vector::sparse::check_dimension;
use crate::vector::SparseVector;

/// Bounds every record identifier satisfies.
///
/// Identifiers order ties between equally distant results.
pub trait RecordId: Ord + Hash + Clone + Debug + Send + Sync {}

impl<T: Ord + Hash + Clone + Debug + Send + Sync> RecordId for T {}

/// Bounds every record payload satisfies.
pub trait Payload: Clone + Send + Sync {}

impl<T: Clone + Send + Sync> Payload for T {}

/// An identified vector with caller-supplied payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<I, D> {
    pub id: I,
    pub data: D,
    pub vector: SparseVector,
}

impl<I, D> Record<I, D> {
    pub fn new(id: I, data: D, vector: SparseVector) -> Self {
        Self { id, data, vector }
    }
}

/// A search hit: the record plus its distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundDataPoint<I, D> {
    pub id: I,
    pub data: D,
    pub vector: SparseVector,
    pub distance: f32,
}

/// Outcome of a batch insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertReport<I> {
    /// Records actually inserted.
    pub inserted: usize,
    /// Identifiers rejected because they were already live, or repeated
    /// earlier in the same batch.
    pub duplicates: Vec<I>,
}

impl<I> Default for InsertReport<I> {
    fn default() -> Self {
        Self {
            inserted: 0,
            duplicates: Vec::new(),
        }
    }
}

/// Identifier and payload kept next to a vector inside a distance space.
#[derive(Debug, Clone)]
pub(crate) struct Entry<I, D> {
    pub id: I,
    pub data: D,
}

impl<I: RecordId, D: Payload> Element for Entry<I, D> {
    type Key = I;

    fn key(&self) -> I {
        self.id.clone()
    }
}

/// Split `records` into those to insert and the identifiers to reject.
///
/// The whole batch fails if any vector disagrees with `dimension` (or with
/// the first vector of the batch when `dimension` is unknown); nothing is
/// split in that case.
pub(crate) fn split_duplicates<I: RecordId, D>(
    records: Vec<Record<I, D>>,
    dimension: Option<usize>,
    is_live: impl Fn(&I) -> bool,
) -> Result<(Vec<Record<I, D>>, Vec<I>)> {
    if let Some(expected) = dimension.or_else(|| records.first().map(|r| r.vector.dimension())) {
        for record in &records {
            check_dimension(expected, record.vector.dimension())?;
        }
    }

    let mut seen = HashSet::with_capacity(records.len());
    let mut accepted = Vec::with_capacity(records.len());
    let mut duplicates = Vec::new();
    for record in records {
        if is_live(&record.id) || !seen.insert(record.id.clone()) {
            duplicates.push(record.id);
        } else {
            accepted.push(record);
        }
    }
    Ok((accepted, duplicates))
}
