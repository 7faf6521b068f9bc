//! Balanced k-means clustering
//!
//! Groups sparse vectors into k clusters of near-equal size.
//! Used to split oversized cluster index nodes into child clusters.
//!
//! Seeding is k-means++ driven by an explicit seed. Assignment is
//! capacity-constrained: no cluster takes more than `ceil(n / k)` members.
//! Records are placed in ascending order of their distance to the nearest
//! centroid, each into the nearest cluster that still has room.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::debug;

use crate::distance::{DistanceMetric, DistanceSpace};
use crate::error::{IndexError, Result};
use crate::vector::SparseVector;

/// Queries scored against the centroids per block during assignment.
const ASSIGN_BLOCK: usize = 4096;

/// Nearest centroids remembered per record before falling back to a rescan.
const PREFERENCES: usize = 16;

/// K-means configuration
#[derive(Debug, Clone)]
pub struct KMeans {
    /// Number of clusters
    pub k: usize,
    /// Distance metric used
    pub metric: DistanceMetric,
    /// Refinement rounds after seeding
    pub max_iterations: usize,
    /// Seed for k-means++ initialization
    pub seed: u64,
    /// Chunk size for the centroid distance space
    pub batch_size: usize,
}

/// Assignment of vectors to clusters
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAssignment {
    /// Which cluster each vector belongs to (index)
    pub assignments: Vec<usize>,
    /// Distance from each vector to its assigned centroid
    pub distances: Vec<f32>,
}

/// Final clustering: non-empty groups of record positions and their centroids.
#[derive(Debug, Clone)]
pub struct Partition {
    /// One representative per group.
    pub centroids: Vec<SparseVector>,
    /// Positions into the clustered slice, ascending within each group.
    pub groups: Vec<Vec<usize>>,
}

impl KMeans {
    pub fn new(k: usize, metric: DistanceMetric) -> Self {
        Self {
            k,
            metric,
            max_iterations: 5,
            seed: 42,
            batch_size: 50_000,
        }
    }

    /// Configure a deterministic seed for k-means++ initialization.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Pick initial centroids with greedy k-means++.
    ///
    /// Each step draws a few candidates with probability proportional to the
    /// squared distance to the nearest centroid chosen so far, and keeps the
    /// one that lowers the total squared distance the most.
    pub fn init_plusplus(&self, vectors: &[SparseVector], rng: &mut StdRng) -> Result<Vec<SparseVector>> {
        let n = vectors.len();
        let k = self.k.min(n);
        if k == 0 {
            return Ok(Vec::new());
        }
        let trials = 2 + (k as f64).ln().floor() as usize;

        // Score candidate centroids (as queries) against every vector at once.
        let positions: Vec<usize> = (0..n).collect();
        let space = DistanceSpace::new(self.metric, vectors.to_vec(), positions, self.batch_size)?;

        let mut chosen = vec![rng.gen_range(0..n)];
        let mut nearest = first_row(space.score(&vectors[chosen[0]..=chosen[0]])?);

        while chosen.len() < k {
            let candidates: Vec<usize> = (0..trials).map(|_| sample_weighted(&nearest, rng)).collect();
            let picked: Vec<SparseVector> = candidates.iter().map(|&i| vectors[i].clone()).collect();
            let rows = space.score(&picked)?;

            let (best, row) = candidates
                .into_iter()
                .zip(rows)
                .map(|(candidate, row)| {
                    let potential: f64 = nearest
                        .iter()
                        .zip(&row)
                        .map(|(&a, &b)| f64::from(a.min(b)).powi(2))
                        .sum();
                    (potential, candidate, row)
                })
                .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
                .map(|(_, candidate, row)| (candidate, row))
                .ok_or_else(|| IndexError::InvalidConfig("no k-means++ candidates".to_string()))?;

            for (current, candidate) in nearest.iter_mut().zip(row) {
                *current = current.min(candidate);
            }
            chosen.push(best);
        }

        Ok(chosen.into_iter().map(|i| vectors[i].clone()).collect())
    }

    /// Run balanced k-means.
    ///
    /// Returns the final centroids and the assignment they produce.
    pub fn fit(&self, vectors: &[SparseVector]) -> Result<(Vec<SparseVector>, ClusterAssignment)> {
        if vectors.is_empty() {
            return Err(IndexError::InvalidConfig(
                "cannot cluster an empty vector set".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = self.init_plusplus(vectors, &mut rng)?;
        let mut assignment = self.assign(vectors, &centroids)?;

        for iteration in 0..self.max_iterations {
            centroids = self.update_centroids(vectors, &assignment, &centroids)?;
            let next = self.assign(vectors, &centroids)?;
            let converged = next.assignments == assignment.assignments;
            assignment = next;
            if converged {
                debug!(iteration, "k-means converged");
                break;
            }
        }

        Ok((centroids, assignment))
    }

    /// Capacity-constrained assignment of every vector to a centroid.
    pub fn assign(&self, vectors: &[SparseVector], centroids: &[SparseVector]) -> Result<ClusterAssignment> {
        let n = vectors.len();
        let k = centroids.len();
        if k == 0 {
            return Err(IndexError::InvalidConfig(
                "cannot assign vectors without centroids".to_string(),
            ));
        }
        let capacity = n.div_ceil(k);

        let labels: Vec<usize> = (0..k).collect();
        let space = DistanceSpace::new(self.metric, centroids.to_vec(), labels, self.batch_size)?;

        // Per vector: nearest few centroids as (distance, centroid).
        let mut preferences: Vec<Vec<(f32, usize)>> = Vec::with_capacity(n);
        for block in vectors.chunks(ASSIGN_BLOCK) {
            let matrix = space.score(block)?;
            preferences.par_extend(matrix.into_par_iter().map(|row| ranked_centroids(&row, PREFERENCES)));
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            preferences[a][0]
                .0
                .total_cmp(&preferences[b][0].0)
                .then(a.cmp(&b))
        });

        let mut counts = vec![0usize; k];
        let mut assignments = vec![0usize; n];
        let mut distances = vec![0.0f32; n];
        for i in order {
            let open = preferences[i]
                .iter()
                .copied()
                .find(|&(_, c)| counts[c] < capacity);
            let (distance, cluster) = match open {
                Some(choice) => choice,
                None => {
                    // Every remembered centroid is full; rescan all of them.
                    let row = first_row(space.score(&vectors[i..=i])?);
                    ranked_centroids(&row, k)
                        .into_iter()
                        .find(|&(_, c)| counts[c] < capacity)
                        .ok_or_else(|| {
                            IndexError::InvalidConfig("cluster capacity exhausted".to_string())
                        })?
                }
            };
            counts[cluster] += 1;
            assignments[i] = cluster;
            distances[i] = distance;
        }

        Ok(ClusterAssignment {
            assignments,
            distances,
        })
    }

    /// Recompute centroids from the current assignment.
    ///
    /// A cluster that ended up empty keeps its previous centroid.
    fn update_centroids(
        &self,
        vectors: &[SparseVector],
        assignment: &ClusterAssignment,
        previous: &[SparseVector],
    ) -> Result<Vec<SparseVector>> {
        let mut members: Vec<Vec<&SparseVector>> = vec![Vec::new(); previous.len()];
        for (vector, &cluster) in vectors.iter().zip(&assignment.assignments) {
            members[cluster].push(vector);
        }

        members
            .par_iter()
            .zip(previous.par_iter())
            .map(|(group, old)| {
                if group.is_empty() {
                    Ok(old.clone())
                } else {
                    self.metric.centroid(group)
                }
            })
            .collect()
    }

    /// Cluster `vectors` and return the non-empty groups.
    pub fn partition(&self, vectors: &[SparseVector]) -> Result<Partition> {
        let (centroids, assignment) = self.fit(vectors)?;

        let mut groups = vec![Vec::new(); centroids.len()];
        for (i, &cluster) in assignment.assignments.iter().enumerate() {
            groups[cluster].push(i);
        }

        let (centroids, groups) = centroids
            .into_iter()
            .zip(groups)
            .filter(|(_, group)| !group.is_empty())
            .unzip();
        Ok(Partition { centroids, groups })
    }
}

/// The `limit` nearest centroids of one score row, ascending by
/// (distance, centroid).
fn ranked_centroids(row: &[f32], limit: usize) -> Vec<(f32, usize)> {
    let mut ranked: Vec<(f32, usize)> = row.iter().copied().zip(0..).collect();
    let by_distance = |a: &(f32, usize), b: &(f32, usize)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));
    if ranked.len() > limit {
        ranked.select_nth_unstable_by(limit - 1, by_distance);
        ranked.truncate(limit);
    }
    ranked.sort_by(by_distance);
    ranked
}

/// Draw a position with probability proportional to its squared distance.
/// Falls back to a uniform draw when every distance is zero.
fn sample_weighted(nearest: &[f32], rng: &mut StdRng) -> usize {
    let total: f64 = nearest.iter().map(|&d| f64::from(d).powi(2)).sum();
    if total <= 0.0 {
        return rng.gen_range(0..nearest.len());
    }

    let mut target = rng.gen::<f64>() * total;
    let mut pick = nearest.len() - 1;
    for (i, &d) in nearest.iter().enumerate() {
        let weight = f64::from(d).powi(2);
        if weight == 0.0 {
            continue;
        }
        pick = i;
        target -= weight;
        if target <= 0.0 {
            break;
        }
    }
    pick
}

fn first_row(matrix: Vec<Vec<f32>>) -> Vec<f32> {
    matrix.into_iter().next().unwrap_or_default()
}
