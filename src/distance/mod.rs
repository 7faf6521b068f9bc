//! Distance metrics and the batched distance space
//!
//! Both metrics are normalized to a single convention: 0 means identical
//! and larger means farther, so one ascending sort yields nearest first.

pub mod heap;
pub mod space;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::vector::SparseVector;

pub use heap::Neighbor;
pub use space::{DistanceSpace, Element, MAX_BATCH_SIZE};

/// Distance metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Cosine distance (1 - cosine_similarity).
    ///
    /// A zero-norm vector scores the maximal distance 1 against every
    /// vector, another zero vector included.
    #[default]
    Cosine,
    /// Jaccard distance over presence patterns (1 - |A ∩ B| / |A ∪ B|).
    ///
    /// Values are ignored. Two empty patterns score 0.
    JaccardBinary,
}

impl DistanceMetric {
    /// All supported metrics.
    pub const ALL: [DistanceMetric; 2] = [DistanceMetric::Cosine, DistanceMetric::JaccardBinary];

    /// Canonical name, as accepted by [`FromStr`].
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "Cosine",
            DistanceMetric::JaccardBinary => "JaccardBinary",
        }
    }

    /// The per-vector quantity the batched product is normalized by:
    /// the Euclidean norm for cosine, the set size for Jaccard.
    #[inline]
    pub(crate) fn magnitude(&self, vector: &SparseVector) -> f64 {
        match self {
            DistanceMetric::Cosine => vector.norm_f64(),
            DistanceMetric::JaccardBinary => vector.nnz() as f64,
        }
    }

    /// Value stored for a nonzero entry in the reference matrix.
    #[inline]
    pub(crate) fn weight(&self, value: f32) -> f32 {
        match self {
            DistanceMetric::Cosine => value,
            DistanceMetric::JaccardBinary => 1.0,
        }
    }

    /// Turn a dot product (or intersection count) plus both magnitudes into
    /// a distance. Inputs are `f64` so small norms keep their precision.
    #[inline]
    pub(crate) fn from_parts(&self, product: f64, query: f64, reference: f64) -> f32 {
        let distance = match self {
            DistanceMetric::Cosine => {
                if query == 0.0 || reference == 0.0 {
                    return 1.0;
                }
                (1.0 - product / (query * reference)).max(0.0)
            }
            DistanceMetric::JaccardBinary => {
                // Inclusion-exclusion: |A ∪ B| = |A| + |B| - |A ∩ B|
                let union = query + reference - product;
                if union <= 0.0 {
                    return 0.0;
                }
                (1.0 - product / union).max(0.0)
            }
        };
        distance as f32
    }

    /// Distance between two vectors of the same dimension.
    pub fn distance(&self, a: &SparseVector, b: &SparseVector) -> Result<f32> {
        let product = match self {
            DistanceMetric::Cosine => a.dot_f64(b)?,
            DistanceMetric::JaccardBinary => a.indicator().dot_f64(&b.indicator())?,
        };
        Ok(self.from_parts(product, self.magnitude(a), self.magnitude(b)))
    }

    /// Representative vector for a group of members.
    ///
    /// Cosine uses the arithmetic mean. JaccardBinary keeps positions present
    /// in at least half of the members, falling back to the mean presence
    /// pattern when no position reaches that majority.
    pub fn centroid(&self, members: &[&SparseVector]) -> Result<SparseVector> {
        let Some(first) = members.first() else {
            return Err(IndexError::InvalidConfig(
                "cannot compute the centroid of an empty group".to_string(),
            ));
        };

        let mut sum = SparseVector::zeros(first.dimension());
        for member in members {
            sum = match self {
                DistanceMetric::Cosine => sum.add(member)?,
                DistanceMetric::JaccardBinary => sum.add(&member.indicator())?,
            };
        }
        let mut mean = sum.div(members.len() as f32)?;

        if *self == DistanceMetric::JaccardBinary {
            let mut majority = mean.clone();
            majority.retain(|share| share >= 0.5);
            let pattern = if majority.is_zero() { mean } else { majority };
            mean = pattern.indicator();
        }
        Ok(mean)
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DistanceMetric {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        DistanceMetric::ALL
            .into_iter()
            .find(|metric| metric.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| IndexError::UnknownMetric(s.to_string()))
    }
}
