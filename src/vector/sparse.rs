//! Sparse vector with a fixed total dimension.
//!
//! Entries are stored as parallel position/value arrays, sorted by position,
//! with explicit zeros dropped. Absent positions are zero; for presence-based
//! metrics the set of stored positions is the vector's presence pattern.

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// A sparse numeric vector over a fixed dimension.
///
/// # Example
///
/// ```
/// use sparnn::SparseVector;
///
/// let v = SparseVector::new(10, vec![(7, 0.5), (2, 1.0)]).unwrap();
/// assert_eq!(v.dimension(), 10);
/// assert_eq!(v.presence(), &[2, 7]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SparseParts")]
pub struct SparseVector {
    dimension: usize,
    /// Sorted, unique positions of nonzero entries.
    indices: Vec<u32>,
    /// Values parallel to `indices`, never zero.
    values: Vec<f32>,
}

/// Serialized field layout of [`SparseVector`], validated on the way in.
#[derive(Deserialize)]
struct SparseParts {
    dimension: usize,
    indices: Vec<u32>,
    values: Vec<f32>,
}

impl TryFrom<SparseParts> for SparseVector {
    type Error = IndexError;

    fn try_from(parts: SparseParts) -> Result<Self> {
        if parts.indices.len() != parts.values.len() {
            return Err(IndexError::MalformedVector(format!(
                "{} positions but {} values",
                parts.indices.len(),
                parts.values.len()
            )));
        }
        SparseVector::new(parts.dimension, parts.indices.into_iter().zip(parts.values).collect())
    }
}

impl SparseVector {
    /// Create a sparse vector from (position, value) pairs.
    ///
    /// Pairs may arrive in any order. Zero values are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if a position is `>= dimension`, a value is NaN or
    /// infinite, or the same position appears twice.
    pub fn new(dimension: usize, mut entries: Vec<(u32, f32)>) -> Result<Self> {
        for &(idx, value) in &entries {
            if idx as usize >= dimension {
                return Err(IndexError::IndexOutOfBounds {
                    index: idx as usize,
                    dimension,
                });
            }
            check_finite(idx as usize, value)?;
        }

        entries.sort_by_key(|&(idx, _)| idx);
        if let Some(window) = entries.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(IndexError::DuplicateIndex(window[0].0));
        }
        entries.retain(|&(_, v)| v != 0.0);

        let (indices, values) = entries.into_iter().unzip();
        Ok(Self {
            dimension,
            indices,
            values,
        })
    }

    /// The all-zero vector of the given dimension.
    pub fn zeros(dimension: usize) -> Self {
        Self {
            dimension,
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Convert from a dense representation; the dimension is `dense.len()`.
    pub fn from_dense(dense: &[f32]) -> Result<Self> {
        let mut indices = Vec::new();
        let mut values = Vec::new();
        for (i, &value) in dense.iter().enumerate() {
            check_finite(i, value)?;
            if value != 0.0 {
                indices.push(position(i, dense.len())?);
                values.push(value);
            }
        }
        Ok(Self {
            dimension: dense.len(),
            indices,
            values,
        })
    }

    /// Convert from a raw vector where missing features are `None`.
    ///
    /// Both `None` and `Some(0.0)` are treated as absent.
    pub fn from_optional(raw: &[Option<f32>]) -> Result<Self> {
        let mut indices = Vec::new();
        let mut values = Vec::new();
        for (i, value) in raw.iter().enumerate() {
            if let Some(value) = *value {
                check_finite(i, value)?;
                if value != 0.0 {
                    indices.push(position(i, raw.len())?);
                    values.push(value);
                }
            }
        }
        Ok(Self {
            dimension: raw.len(),
            indices,
            values,
        })
    }

    /// Expand into a dense vector of length `dimension()`.
    pub fn to_dense(&self) -> Vec<f32> {
        let mut dense = vec![0.0; self.dimension];
        for (idx, value) in self.iter() {
            dense[idx as usize] = value;
        }
        dense
    }

    /// Total dimension D.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored (nonzero) entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// True when no entry is nonzero.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.indices.is_empty()
    }

    /// Positions of nonzero entries, ascending.
    #[inline]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// The presence pattern: same positions as [`indices`](Self::indices).
    #[inline]
    pub fn presence(&self) -> &[u32] {
        &self.indices
    }

    /// Values parallel to [`presence`](Self::presence).
    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Iterate over (position, value) pairs in position order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    /// Value at `position`, zero if absent.
    pub fn get(&self, position: u32) -> f32 {
        match self.indices.binary_search(&position) {
            Ok(i) => self.values[i],
            Err(_) => 0.0,
        }
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f32 {
        self.norm_f64() as f32
    }

    /// Euclidean norm accumulated in `f64`, so tiny entries do not
    /// underflow to a zero norm.
    pub(crate) fn norm_f64(&self) -> f64 {
        self.values
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum::<f64>()
            .sqrt()
    }

    /// Fail with [`IndexError::DimensionMismatch`] unless `other` has the same D.
    #[inline]
    pub fn check_dimension(&self, other: &SparseVector) -> Result<()> {
        check_dimension(self.dimension, other.dimension)
    }

    /// Dot product with another vector of the same dimension.
    pub fn dot(&self, other: &SparseVector) -> Result<f32> {
        self.dot_f64(other).map(|sum| sum as f32)
    }

    /// Dot product accumulated in `f64`.
    pub(crate) fn dot_f64(&self, other: &SparseVector) -> Result<f64> {
        self.check_dimension(other)?;

        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0f64;
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += f64::from(self.values[i]) * f64::from(other.values[j]);
                    i += 1;
                    j += 1;
                }
            }
        }
        Ok(sum)
    }

    /// Componentwise sum. The result holds the union of both presence
    /// patterns, minus positions whose values cancel to exactly zero.
    pub fn add(&self, other: &SparseVector) -> Result<SparseVector> {
        self.check_dimension(other)?;

        let capacity = self.nnz() + other.nnz();
        let mut indices = Vec::with_capacity(capacity);
        let mut values = Vec::with_capacity(capacity);
        let mut push = |idx: u32, value: f32| {
            if value != 0.0 {
                indices.push(idx);
                values.push(value);
            }
        };

        let (mut i, mut j) = (0, 0);
        while i < self.indices.len() || j < other.indices.len() {
            let left = self.indices.get(i).copied();
            let right = other.indices.get(j).copied();
            match (left, right) {
                (Some(a), Some(b)) if a == b => {
                    push(a, self.values[i] + other.values[j]);
                    i += 1;
                    j += 1;
                }
                (Some(a), Some(b)) if a < b => {
                    push(a, self.values[i]);
                    i += 1;
                }
                (Some(a), None) => {
                    push(a, self.values[i]);
                    i += 1;
                }
                (_, Some(b)) => {
                    push(b, other.values[j]);
                    j += 1;
                }
                (None, None) => break,
            }
        }

        Ok(SparseVector {
            dimension: self.dimension,
            indices,
            values,
        })
    }

    /// Divide every entry by `divisor`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidValue`] for a zero or non-finite divisor.
    pub fn div(&self, divisor: f32) -> Result<SparseVector> {
        if divisor == 0.0 {
            return Err(IndexError::InvalidValue {
                index: 0,
                value: divisor,
                reason: "division by zero",
            });
        }
        check_finite(0, divisor)?;

        let mut result = SparseVector::zeros(self.dimension);
        for (idx, value) in self.iter() {
            let scaled = value / divisor;
            if scaled != 0.0 {
                result.indices.push(idx);
                result.values.push(scaled);
            }
        }
        Ok(result)
    }

    /// `(a + b) / 2`, dimension-checked.
    pub fn midpoint(a: &SparseVector, b: &SparseVector) -> Result<SparseVector> {
        a.add(b)?.div(2.0)
    }

    /// Keep only entries whose value satisfies `keep`.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(f32) -> bool) {
        let mut write = 0;
        for read in 0..self.indices.len() {
            if keep(self.values[read]) {
                self.indices[write] = self.indices[read];
                self.values[write] = self.values[read];
                write += 1;
            }
        }
        self.indices.truncate(write);
        self.values.truncate(write);
    }

    /// Same presence pattern with every value set to 1.
    pub(crate) fn indicator(&self) -> SparseVector {
        SparseVector {
            dimension: self.dimension,
            indices: self.indices.clone(),
            values: vec![1.0; self.indices.len()],
        }
    }
}

#[inline]
pub(crate) fn check_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(IndexError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

fn check_finite(index: usize, value: f32) -> Result<()> {
    if !value.is_finite() {
        return Err(IndexError::InvalidValue {
            index,
            value,
            reason: if value.is_nan() {
                "NaN values are not allowed"
            } else {
                "Infinite values are not allowed"
            },
        });
    }
    Ok(())
}

fn position(index: usize, dimension: usize) -> Result<u32> {
    u32::try_from(index).map_err(|_| IndexError::IndexOutOfBounds { index, dimension })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sorts_and_drops_zeros() {
        let v = SparseVector::new(8, vec![(5, 2.0), (1, 0.0), (3, -1.0)]).unwrap();
        assert_eq!(v.presence(), &[3, 5]);
        assert_eq!(v.values(), &[-1.0, 2.0]);
        assert_eq!(v.nnz(), 2);
    }

    #[test]
    fn test_new_rejects_bad_entries() {
        assert!(matches!(
            SparseVector::new(4, vec![(4, 1.0)]),
            Err(IndexError::IndexOutOfBounds { index: 4, dimension: 4 })
        ));
        assert!(matches!(
            SparseVector::new(4, vec![(1, 1.0), (1, 0.0)]),
            Err(IndexError::DuplicateIndex(1))
        ));
        assert!(matches!(
            SparseVector::new(4, vec![(0, f32::NAN)]),
            Err(IndexError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_dense_round_trip() {
        let dense = vec![0.0, 1.5, 0.0, -2.0];
        let v = SparseVector::from_dense(&dense).unwrap();
        assert_eq!(v.dimension(), 4);
        assert_eq!(v.presence(), &[1, 3]);
        assert_eq!(v.to_dense(), dense);
    }

    #[test]
    fn test_from_optional_treats_missing_as_absent() {
        let v = SparseVector::from_optional(&[None, Some(0.0), Some(3.0), None]).unwrap();
        assert_eq!(v.dimension(), 4);
        assert_eq!(v.presence(), &[2]);
        assert_eq!(v.get(2), 3.0);
        assert_eq!(v.get(0), 0.0);
    }

    #[test]
    fn test_add_is_union_and_drops_cancelled() {
        let a = SparseVector::new(5, vec![(0, 1.0), (2, 2.0)]).unwrap();
        let b = SparseVector::new(5, vec![(2, -2.0), (4, 1.0)]).unwrap();
        let sum = a.add(&b).unwrap();
        assert_eq!(sum.presence(), &[0, 4]);
        assert_eq!(sum.values(), &[1.0, 1.0]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = SparseVector::zeros(3);
        let b = SparseVector::zeros(4);
        assert!(matches!(
            a.add(&b),
            Err(IndexError::DimensionMismatch { expected: 3, actual: 4 })
        ));
        assert!(a.dot(&b).is_err());
        assert!(SparseVector::midpoint(&a, &b).is_err());
    }

    #[test]
    fn test_midpoint_of_self_is_self() {
        let v = SparseVector::new(6, vec![(1, 0.25), (5, 3.0)]).unwrap();
        let mid = SparseVector::midpoint(&v, &v).unwrap();
        assert_eq!(mid, v);
    }

    #[test]
    fn test_div_by_zero_fails() {
        let v = SparseVector::new(2, vec![(0, 1.0)]).unwrap();
        assert!(matches!(v.div(0.0), Err(IndexError::InvalidValue { .. })));
        assert!(v.div(f32::INFINITY).is_err());
        assert_eq!(v.div(4.0).unwrap().get(0), 0.25);
    }

    #[test]
    fn test_dot_and_norm() {
        let a = SparseVector::new(4, vec![(0, 1.0), (1, 2.0)]).unwrap();
        let b = SparseVector::new(4, vec![(1, 3.0), (3, 5.0)]).unwrap();
        assert_eq!(a.dot(&b).unwrap(), 6.0);
        assert!((a.norm() - 5.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_norm_of_tiny_values_is_not_zero() {
        let v = SparseVector::new(2, vec![(0, 3e-25), (1, 4e-25)]).unwrap();
        assert!(v.norm_f64() > 0.0);
        assert!((v.norm_f64() / 5e-25 - 1.0).abs() < 1e-6);
        assert!(v.dot_f64(&v).unwrap() > 0.0);
    }

    #[test]
    fn test_deserialize_validates() {
        let v = SparseVector::new(6, vec![(4, 2.5), (1, -1.0)]).unwrap();
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(serde_json::from_str::<SparseVector>(&json).unwrap(), v);

        let unsorted: SparseVector =
            serde_json::from_str(r#"{"dimension":6,"indices":[4,1,3],"values":[2.5,-1.0,0.0]}"#).unwrap();
        assert_eq!(unsorted, v);

        for bad in [
            r#"{"dimension":2,"indices":[5],"values":[1.0]}"#,
            r#"{"dimension":4,"indices":[1,1],"values":[1.0,2.0]}"#,
            r#"{"dimension":4,"indices":[0,1],"values":[1.0]}"#,
        ] {
            assert!(serde_json::from_str::<SparseVector>(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_indicator_and_retain() {
        let mut v = SparseVector::new(4, vec![(0, 0.2), (2, 0.7), (3, 0.5)]).unwrap();
        assert_eq!(v.indicator().values(), &[1.0, 1.0, 1.0]);
        v.retain(|value| value >= 0.5);
        assert_eq!(v.presence(), &[2, 3]);
    }
}
