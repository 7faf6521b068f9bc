//! Property-based tests for the sparse index.
//!
//! These tests verify invariants that should hold regardless of input:
//! - Vector algebra preserves dimension and rejects mismatches
//! - Distances for nonnegative vectors lie in [0, 1]
//! - A single-leaf index returns the exact brute-force neighbors
//! - Deleted records never come back from a search

use proptest::prelude::*;
use sparnn::{DistanceMetric, IndexConfig, IndexError, IndexStoreBuilder, Record, SparseVector};

prop_compose! {
    fn arb_sparse(dim: usize)(raw in prop::collection::vec(prop::option::weighted(0.3, 0.0f32..10.0), dim)) -> SparseVector {
        SparseVector::from_optional(&raw).unwrap()
    }
}

fn arb_metric() -> impl Strategy<Value = DistanceMetric> {
    prop_oneof![Just(DistanceMetric::Cosine), Just(DistanceMetric::JaccardBinary)]
}

mod vector_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn midpoint_of_self_is_self(v in arb_sparse(48)) {
            let mid = SparseVector::midpoint(&v, &v).unwrap();
            prop_assert_eq!(mid.dimension(), v.dimension());
            prop_assert_eq!(mid.to_dense(), v.to_dense());
        }

        #[test]
        fn midpoint_preserves_dimension(a in arb_sparse(32), b in arb_sparse(32)) {
            let mid = SparseVector::midpoint(&a, &b).unwrap();
            prop_assert_eq!(mid.dimension(), 32);
            for (i, value) in mid.to_dense().into_iter().enumerate() {
                let expected = (a.get(i as u32) + b.get(i as u32)) / 2.0;
                prop_assert!((value - expected).abs() < 1e-5);
            }
        }

        #[test]
        fn mismatched_dimensions_fail(a in arb_sparse(16), b in arb_sparse(17)) {
            let is_mismatch = |r: Result<SparseVector, IndexError>| {
                matches!(r, Err(IndexError::DimensionMismatch { .. }))
            };
            prop_assert!(is_mismatch(a.add(&b)));
            prop_assert!(is_mismatch(SparseVector::midpoint(&b, &a)));
            prop_assert!(matches!(a.dot(&b), Err(IndexError::DimensionMismatch { .. })), "expected DimensionMismatch from dot");
        }
    }
}

mod distance_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn nonnegative_distances_in_unit_range(
            metric in arb_metric(),
            a in arb_sparse(40),
            b in arb_sparse(40),
        ) {
            let d = metric.distance(&a, &b).unwrap();
            prop_assert!((0.0..=1.0).contains(&d), "{} distance out of range: {}", metric, d);
        }

        #[test]
        fn distance_symmetric(metric in arb_metric(), a in arb_sparse(24), b in arb_sparse(24)) {
            let ab = metric.distance(&a, &b).unwrap();
            let ba = metric.distance(&b, &a).unwrap();
            prop_assert!((ab - ba).abs() < 1e-6);
        }

        #[test]
        fn self_distance_is_zero(metric in arb_metric(), v in arb_sparse(24)) {
            prop_assume!(!v.is_zero());
            prop_assert!(metric.distance(&v, &v).unwrap().abs() < 1e-5);
        }
    }
}

mod index_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(30))]

        #[test]
        fn single_leaf_matches_brute_force(
            metric in arb_metric(),
            vectors in prop::collection::vec(arb_sparse(20), 1..40),
            query in arb_sparse(20),
            k in 1usize..50,
        ) {
            let records: Vec<Record<usize, ()>> = vectors
                .iter()
                .enumerate()
                .map(|(id, v)| Record::new(id, (), v.clone()))
                .collect();
            let config = IndexConfig::new(metric).with_max_cluster_size(1000).with_search_batch_size(7);
            let store = IndexStoreBuilder::build(config, records).unwrap();

            let results = store.find_nearest(&[query.clone()], k).unwrap();
            let hits = &results[0];
            prop_assert_eq!(hits.len(), k.min(vectors.len()));
            prop_assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));

            let mut expected: Vec<f32> = vectors
                .iter()
                .map(|v| metric.distance(&query, v).unwrap())
                .collect();
            expected.sort_by(|a, b| a.total_cmp(b));
            for (hit, distance) in hits.iter().zip(&expected) {
                prop_assert!((hit.distance - distance).abs() < 1e-4);
            }
        }

        #[test]
        fn deleted_records_never_returned(
            vectors in prop::collection::vec(arb_sparse(16), 2..60),
            doomed in prop::collection::vec(0usize..60, 1..20),
        ) {
            let records: Vec<Record<usize, ()>> = vectors
                .iter()
                .enumerate()
                .map(|(id, v)| Record::new(id, (), v.clone()))
                .collect();
            let config = IndexConfig::new(DistanceMetric::Cosine).with_max_cluster_size(4).with_probes(100);
            let store = IndexStoreBuilder::build(config, records).unwrap();

            let live_doomed: std::collections::HashSet<usize> =
                doomed.iter().copied().filter(|&id| id < vectors.len()).collect();
            prop_assert_eq!(store.delete_batch(&doomed).unwrap(), live_doomed.len());
            prop_assert_eq!(store.delete_batch(&doomed).unwrap(), 0);
            prop_assert_eq!(store.count().unwrap(), vectors.len() - live_doomed.len());

            let results = store.find_nearest(&vectors, vectors.len()).unwrap();
            for hits in &results {
                prop_assert_eq!(hits.len(), vectors.len() - live_doomed.len());
                prop_assert!(hits.iter().all(|hit| !live_doomed.contains(&hit.id)));
            }
        }
    }
}
