pub mod dbscan;
pub mod metrics;

pub use dbscan::*;
pub use metrics::*;

use std::collections::HashMap;

use serde::Serialize;

use crate::models::ClusterLabel;

/// Radii tried by [`grid_search`] when none are given
pub const DEFAULT_EPS_GRID: [f64; 4] = [0.10, 0.15, 0.20, 0.25];

/// Neighborhood sizes tried by [`grid_search`] when none are given
pub const DEFAULT_MIN_SAMPLES_GRID: [usize; 3] = [3, 5, 7];

/// Best parameter combination found by a grid search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningResult {
    pub eps: f64,
    pub min_samples: usize,
    pub clusters: usize,
    pub noise: usize,
    pub silhouette: f64,
}

/// Try every `eps × min_samples` pair and keep the best silhouette score.
///
/// Partitions with fewer than two clusters, or where every point is its own
/// cluster, cannot be scored and are skipped. Ties keep the earlier pair.
pub fn grid_search(
    vectors: &[Vec<f32>],
    eps_values: &[f64],
    min_samples_values: &[usize],
) -> Option<TuningResult> {
    let mut best: Option<TuningResult> = None;

    for &eps in eps_values {
        for &min_samples in min_samples_values {
            let labels = Dbscan::new(eps, min_samples).fit(vectors);
            let (clusters, noise) = label_counts(&labels);
            if clusters < 2 || clusters == vectors.len() {
                continue;
            }
            let Some(silhouette) = silhouette_score(vectors, &labels) else {
                continue;
            };
            if best.as_ref().is_none_or(|b| silhouette > b.silhouette) {
                best = Some(TuningResult {
                    eps,
                    min_samples,
                    clusters,
                    noise,
                    silhouette,
                });
            }
        }
    }

    best
}

/// Whether two labellings describe the same partition up to renumbering.
///
/// Noise must match noise exactly; cluster ids only need a consistent
/// one-to-one mapping.
pub fn partitions_equivalent(a: &[ClusterLabel], b: &[ClusterLabel]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut forward: HashMap<u32, u32> = HashMap::new();
    let mut backward: HashMap<u32, u32> = HashMap::new();

    for (left, right) in a.iter().zip(b.iter()) {
        match (left, right) {
            (ClusterLabel::Noise, ClusterLabel::Noise) => {}
            (ClusterLabel::Cluster(x), ClusterLabel::Cluster(y)) => {
                if *forward.entry(*x).or_insert(*y) != *y {
                    return false;
                }
                if *backward.entry(*y).or_insert(*x) != *x {
                    return false;
                }
            }
            _ => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    use ClusterLabel::{Cluster, Noise};

    #[test]
    fn test_relabeled_partition_is_equivalent() {
        let a = vec![Cluster(0), Cluster(0), Noise, Cluster(1)];
        let b = vec![Cluster(7), Cluster(7), Noise, Cluster(3)];
        assert!(partitions_equivalent(&a, &b));
    }

    #[test]
    fn test_merged_clusters_are_not_equivalent() {
        let a = vec![Cluster(0), Cluster(1)];
        let b = vec![Cluster(0), Cluster(0)];
        assert!(!partitions_equivalent(&a, &b));
        assert!(!partitions_equivalent(&b, &a));
    }

    #[test]
    fn test_noise_must_match() {
        let a = vec![Cluster(0), Noise];
        let b = vec![Cluster(0), Cluster(1)];
        assert!(!partitions_equivalent(&a, &b));
    }

    #[test]
    fn test_grid_search_finds_separating_radius() {
        let mut vectors = Vec::new();
        for i in 0..4 {
            vectors.push(vec![1.0, 0.01 * i as f32, 0.0]);
            vectors.push(vec![0.0, 1.0, 0.01 * i as f32]);
        }
        let best = grid_search(&vectors, &[0.05, 1.5], &[2, 3]).unwrap();
        assert_eq!(best.eps, 0.05);
        assert_eq!(best.clusters, 2);
        assert_eq!(best.noise, 0);
        assert!(best.silhouette > 0.9);
    }

    #[test]
    fn test_grid_search_without_structure() {
        let vectors = vec![vec![1.0, 0.0]; 5];
        assert_eq!(grid_search(&vectors, &DEFAULT_EPS_GRID, &DEFAULT_MIN_SAMPLES_GRID), None);
    }
}
