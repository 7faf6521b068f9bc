//! Batched distance space
//!
//! Owns a set of reference vectors plus a parallel array of elements and
//! scores whole query batches against them. Reference rows are split into
//! chunks of at most `batch_size` rows; each chunk keeps its rows in
//! column-major (inverted) form, so scoring a batch of queries against a
//! chunk is one sparse matrix product `Q × Rᵀ` instead of a loop over pairs.
//!
//! Chunks are scored in parallel with rayon. Each chunk produces a bounded
//! top-k heap per query and the heaps are merged afterwards.

use std::collections::HashMap;

use rayon::prelude::*;

use super::heap::{Neighbor, Ranked, TopK};
use super::DistanceMetric;
use crate::error::{IndexError, Result};
use crate::vector::sparse::check_dimension;
use crate::vector::SparseVector;

/// Largest allowed `batch_size`: rows inside a chunk are addressed by `u32`.
pub const MAX_BATCH_SIZE: usize = u32::MAX as usize;

/// Something stored alongside a reference vector.
///
/// The key breaks ties between equally distant rows, smallest first.
pub trait Element: Send + Sync {
    /// Tie-break key.
    type Key: Ord + Clone + Send + Sync;

    /// Key of this element.
    fn key(&self) -> Self::Key;
}

impl Element for usize {
    type Key = usize;

    fn key(&self) -> usize {
        *self
    }
}

/// One block of at most `batch_size` reference rows.
#[derive(Debug, Default)]
struct Chunk {
    /// Global row of this chunk's first row.
    start: usize,
    len: usize,
    /// position -> (local row, weight)
    columns: HashMap<u32, Vec<(u32, f32)>>,
    /// Per-row norm (cosine) or set size (Jaccard).
    magnitudes: Vec<f64>,
}

impl Chunk {
    fn new(start: usize) -> Self {
        Self {
            start,
            ..Self::default()
        }
    }

    fn push(&mut self, vector: &SparseVector, metric: DistanceMetric) {
        let local = self.len as u32;
        for (idx, value) in vector.iter() {
            self.columns
                .entry(idx)
                .or_default()
                .push((local, metric.weight(value)));
        }
        self.magnitudes.push(metric.magnitude(vector));
        self.len += 1;
    }

    /// Products of one query against every row of the chunk, written into
    /// `acc` (length `self.len`).
    fn products(&self, query: &SparseVector, metric: DistanceMetric, acc: &mut [f64]) {
        acc.fill(0.0);
        for (idx, value) in query.iter() {
            if let Some(column) = self.columns.get(&idx) {
                let weight = f64::from(metric.weight(value));
                for &(row, reference) in column {
                    acc[row as usize] += weight * f64::from(reference);
                }
            }
        }
    }

    /// Distances of one query against every row of the chunk.
    fn distances(
        &self,
        query: &SparseVector,
        metric: DistanceMetric,
        acc: &mut Vec<f64>,
    ) -> Vec<(usize, f32)> {
        acc.resize(self.len, 0.0);
        self.products(query, metric, acc);
        let query_magnitude = metric.magnitude(query);
        acc.iter()
            .zip(self.magnitudes.iter())
            .enumerate()
            .map(|(local, (&product, &magnitude))| {
                (
                    self.start + local,
                    metric.from_parts(product, query_magnitude, magnitude),
                )
            })
            .collect()
    }
}

/// Reference vectors and their elements, scored in bulk.
#[derive(Debug)]
pub struct DistanceSpace<T> {
    metric: DistanceMetric,
    batch_size: usize,
    /// Shared dimension, unknown until the first vector arrives.
    dimension: Option<usize>,
    vectors: Vec<SparseVector>,
    elements: Vec<T>,
    chunks: Vec<Chunk>,
}

impl<T: Element> DistanceSpace<T> {
    /// Build a space over `vectors`, with `elements[i]` attached to `vectors[i]`.
    ///
    /// # Errors
    ///
    /// Fails if the two arrays differ in length, the vectors disagree on
    /// dimension, or `batch_size` is zero or above [`MAX_BATCH_SIZE`].
    pub fn new(
        metric: DistanceMetric,
        vectors: Vec<SparseVector>,
        elements: Vec<T>,
        batch_size: usize,
    ) -> Result<Self> {
        if vectors.len() != elements.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                elements: elements.len(),
            });
        }
        if batch_size == 0 {
            return Err(IndexError::InvalidConfig(
                "search batch size must be at least 1".to_string(),
            ));
        }
        if batch_size > MAX_BATCH_SIZE {
            return Err(IndexError::InvalidConfig(format!(
                "search batch size must be at most {MAX_BATCH_SIZE}"
            )));
        }

        let mut space = Self {
            metric,
            batch_size,
            dimension: None,
            vectors: Vec::with_capacity(vectors.len()),
            elements: Vec::with_capacity(elements.len()),
            chunks: Vec::new(),
        };
        for (vector, element) in vectors.into_iter().zip(elements) {
            space.push(vector, element)?;
        }
        Ok(space)
    }

    /// An empty space.
    pub fn empty(metric: DistanceMetric, batch_size: usize) -> Result<Self> {
        Self::new(metric, Vec::new(), Vec::new(), batch_size)
    }

    /// Append one reference row.
    pub fn push(&mut self, vector: SparseVector, element: T) -> Result<()> {
        match self.dimension {
            Some(dimension) => check_dimension(dimension, vector.dimension())?,
            None => self.dimension = Some(vector.dimension()),
        }

        let row = self.vectors.len();
        let needs_chunk = self
            .chunks
            .last()
            .map_or(true, |chunk| chunk.len >= self.batch_size);
        if needs_chunk {
            self.chunks.push(Chunk::new(row));
        }
        if let Some(chunk) = self.chunks.last_mut() {
            chunk.push(&vector, self.metric);
        }

        self.vectors.push(vector);
        self.elements.push(element);
        Ok(())
    }

    /// Full distance matrix: one row per query, one column per reference row.
    pub fn score(&self, queries: &[SparseVector]) -> Result<Vec<Vec<f32>>> {
        self.check_queries(queries)?;

        let metric = self.metric;
        let per_chunk: Vec<Vec<Vec<f32>>> = self
            .chunks
            .par_iter()
            .map(|chunk| {
                queries
                    .par_iter()
                    .map_init(Vec::new, |acc, query| {
                        chunk
                            .distances(query, metric, acc)
                            .into_iter()
                            .map(|(_, d)| d)
                            .collect()
                    })
                    .collect()
            })
            .collect();

        let mut matrix: Vec<Vec<f32>> = queries
            .iter()
            .map(|_| Vec::with_capacity(self.len()))
            .collect();
        for chunk_rows in per_chunk {
            for (row, distances) in matrix.iter_mut().zip(chunk_rows) {
                row.extend(distances);
            }
        }
        Ok(matrix)
    }

    /// Per query, the `k` nearest rows not rejected by `excluded`, in
    /// ascending (distance, element key) order.
    pub fn nearest<F>(&self, queries: &[SparseVector], k: usize, excluded: F) -> Result<Vec<Vec<Neighbor>>>
    where
        F: Fn(usize) -> bool + Sync,
    {
        self.check_queries(queries)?;

        let metric = self.metric;
        let per_chunk: Vec<Vec<TopK<T::Key, usize>>> = self
            .chunks
            .par_iter()
            .map(|chunk| {
                queries
                    .par_iter()
                    .map_init(Vec::new, |acc, query| {
                        let mut top = TopK::new(k);
                        for (row, distance) in chunk.distances(query, metric, acc) {
                            if excluded(row) || !top.admits(distance) {
                                continue;
                            }
                            top.push(Ranked {
                                distance,
                                key: self.elements[row].key(),
                                item: row,
                            });
                        }
                        top
                    })
                    .collect()
            })
            .collect();

        let mut merged: Vec<TopK<T::Key, usize>> = queries.iter().map(|_| TopK::new(k)).collect();
        for chunk_heaps in per_chunk {
            for (top, heap) in merged.iter_mut().zip(chunk_heaps) {
                top.merge(heap);
            }
        }

        Ok(merged
            .into_iter()
            .map(|top| {
                top.into_sorted()
                    .into_iter()
                    .map(|ranked| Neighbor {
                        row: ranked.item,
                        distance: ranked.distance,
                    })
                    .collect()
            })
            .collect())
    }

    fn check_queries(&self, queries: &[SparseVector]) -> Result<()> {
        if let Some(dimension) = self.dimension {
            for query in queries {
                check_dimension(dimension, query.dimension())?;
            }
        }
        Ok(())
    }

    /// Give back the owned vectors and elements.
    pub fn into_parts(self) -> (Vec<SparseVector>, Vec<T>) {
        (self.vectors, self.elements)
    }

    /// Number of reference rows.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// True when the space holds no rows.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn vector(&self, row: usize) -> &SparseVector {
        &self.vectors[row]
    }

    pub fn element(&self, row: usize) -> &T {
        &self.elements[row]
    }

    pub fn vectors(&self) -> &[SparseVector] {
        &self.vectors
    }

    pub fn elements(&self) -> &[T] {
        &self.elements
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of chunks the rows are split into.
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }
}
