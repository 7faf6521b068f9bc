//! Bounded top-k selection
//!
//! Candidates are totally ordered by (distance, key), so merging partial
//! results from several chunks or subtrees gives the same answer no matter
//! which part finished first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One scored reference row of a [`DistanceSpace`](super::DistanceSpace).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row in the space that produced it.
    pub row: usize,
    /// Distance to the query.
    pub distance: f32,
}

/// A candidate ranked by distance, ties broken by ascending key.
#[derive(Debug, Clone)]
pub(crate) struct Ranked<K, T> {
    pub distance: f32,
    pub key: K,
    pub item: T,
}

impl<K: Ord, T> PartialEq for Ranked<K, T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord, T> Eq for Ranked<K, T> {}

impl<K: Ord, T> PartialOrd for Ranked<K, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, T> Ord for Ranked<K, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.key.cmp(&other.key))
    }
}

/// Max-heap holding the k best (smallest) candidates seen so far.
#[derive(Debug)]
pub(crate) struct TopK<K, T> {
    k: usize,
    heap: BinaryHeap<Ranked<K, T>>,
}

impl<K: Ord, T> TopK<K, T> {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.min(1024) + 1),
        }
    }

    /// Cheap pre-check so callers can skip building a key for a candidate
    /// that cannot make the cut.
    #[inline]
    pub fn admits(&self, distance: f32) -> bool {
        if self.k == 0 {
            return false;
        }
        match self.heap.peek() {
            Some(worst) if self.heap.len() >= self.k => distance <= worst.distance,
            _ => true,
        }
    }

    pub fn push(&mut self, candidate: Ranked<K, T>) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(candidate);
            return;
        }
        if let Some(mut worst) = self.heap.peek_mut() {
            if candidate < *worst {
                *worst = candidate;
            }
        }
    }

    pub fn merge(&mut self, other: TopK<K, T>) {
        for candidate in other.heap {
            self.push(candidate);
        }
    }

    /// Candidates in ascending (distance, key) order.
    pub fn into_sorted(self) -> Vec<Ranked<K, T>> {
        self.heap.into_sorted_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(distance: f32, key: u32) -> Ranked<u32, ()> {
        Ranked {
            distance,
            key,
            item: (),
        }
    }

    #[test]
    fn test_keeps_k_smallest_sorted() {
        let mut top = TopK::new(3);
        for (d, key) in [(0.9, 1), (0.1, 2), (0.5, 3), (0.3, 4), (0.7, 5)] {
            top.push(ranked(d, key));
        }
        let keys: Vec<u32> = top.into_sorted().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![2, 4, 3]);
    }

    #[test]
    fn test_ties_broken_by_key() {
        let mut top = TopK::new(2);
        for key in [9, 3, 7, 1] {
            top.push(ranked(0.5, key));
        }
        let keys: Vec<u32> = top.into_sorted().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![1, 3]);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let build = |items: &[(f32, u32)]| {
            let mut top = TopK::new(3);
            for &(d, key) in items {
                top.push(ranked(d, key));
            }
            top
        };
        let left = [(0.2, 1), (0.4, 2), (0.4, 3)];
        let right = [(0.4, 0), (0.1, 5)];

        let mut a = build(&left);
        a.merge(build(&right));
        let mut b = build(&right);
        b.merge(build(&left));

        let a: Vec<u32> = a.into_sorted().into_iter().map(|r| r.key).collect();
        let b: Vec<u32> = b.into_sorted().into_iter().map(|r| r.key).collect();
        assert_eq!(a, vec![5, 1, 0]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_k_admits_nothing() {
        let mut top = TopK::new(0);
        assert!(!top.admits(0.0));
        top.push(ranked(0.0, 1));
        assert!(top.into_sorted().is_empty());
    }
}
