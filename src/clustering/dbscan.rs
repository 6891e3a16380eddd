use std::collections::VecDeque;

use super::metrics::{normalize, unit_distance};
use crate::models::ClusterLabel;

/// Density-based clustering over cosine distance.
///
/// Points are visited in input order and clusters are numbered in the order
/// their first core point is met, so identical input produces identical labels.
/// A border point reachable from two clusters joins the one discovered first.
#[derive(Debug, Clone, PartialEq)]
pub struct Dbscan {
    /// Neighborhood radius in cosine distance (inclusive)
    pub eps: f64,
    /// Points within `eps`, the point itself included, needed to be a core point
    pub min_samples: usize,
}

impl Dbscan {
    pub fn new(eps: f64, min_samples: usize) -> Self {
        Self { eps, min_samples }
    }

    /// Label every vector with a cluster id or noise
    pub fn fit(&self, vectors: &[Vec<f32>]) -> Vec<ClusterLabel> {
        let n = vectors.len();
        if n == 0 {
            return Vec::new();
        }

        let neighborhoods = self.neighborhoods(vectors);
        let is_core: Vec<bool> = neighborhoods
            .iter()
            .map(|nb| nb.len() >= self.min_samples.max(1))
            .collect();

        let mut labels: Vec<Option<u32>> = vec![None; n];
        let mut next_id = 0u32;

        for seed in 0..n {
            if labels[seed].is_some() || !is_core[seed] {
                continue;
            }

            let cluster_id = next_id;
            next_id += 1;
            labels[seed] = Some(cluster_id);

            let mut queue = VecDeque::from([seed]);
            while let Some(point) = queue.pop_front() {
                for &neighbor in &neighborhoods[point] {
                    if labels[neighbor].is_some() {
                        continue;
                    }
                    labels[neighbor] = Some(cluster_id);
                    if is_core[neighbor] {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        labels
            .into_iter()
            .map(|l| l.map_or(ClusterLabel::Noise, ClusterLabel::Cluster))
            .collect()
    }

    /// Indices within `eps` of each point, in ascending order, self included
    fn neighborhoods(&self, vectors: &[Vec<f32>]) -> Vec<Vec<usize>> {
        let units: Vec<Vec<f64>> = vectors.iter().map(|v| normalize(v)).collect();
        let n = units.len();
        let mut neighborhoods = vec![Vec::new(); n];

        for i in 0..n {
            for j in i..n {
                if i == j || unit_distance(&units[i], &units[j]) <= self.eps {
                    neighborhoods[i].push(j);
                    if i != j {
                        neighborhoods[j].push(i);
                    }
                }
            }
        }
        for nb in &mut neighborhoods {
            nb.sort_unstable();
        }
        neighborhoods
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::partitions_equivalent;
    use proptest::prelude::*;

    fn two_groups() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.0, 0.0],
            vec![0.98, 0.05, 0.0],
            vec![0.97, 0.0, 0.06],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.97, 0.05],
        ]
    }

    #[test]
    fn test_empty_input() {
        assert!(Dbscan::new(0.1, 2).fit(&[]).is_empty());
    }

    #[test]
    fn test_two_groups() {
        let labels = Dbscan::new(0.1, 2).fit(&two_groups());
        assert_eq!(
            labels,
            vec![
                ClusterLabel::Cluster(0),
                ClusterLabel::Cluster(0),
                ClusterLabel::Cluster(0),
                ClusterLabel::Cluster(1),
                ClusterLabel::Cluster(1),
            ]
        );
    }

    #[test]
    fn test_identical_vectors_form_one_cluster() {
        let vectors = vec![vec![0.3, 0.4, 0.5]; 6];
        let labels = Dbscan::new(0.01, 3).fit(&vectors);
        assert!(labels.iter().all(|l| *l == ClusterLabel::Cluster(0)));
    }

    #[test]
    fn test_fewer_points_than_min_samples_is_all_noise() {
        let vectors = vec![vec![1.0, 0.0]; 2];
        let labels = Dbscan::new(0.5, 3).fit(&vectors);
        assert!(labels.iter().all(ClusterLabel::is_noise));
    }

    #[test]
    fn test_isolated_point_is_noise() {
        let mut vectors = two_groups();
        vectors.push(vec![0.0, 0.0, 1.0]);
        let labels = Dbscan::new(0.1, 2).fit(&vectors);
        assert_eq!(labels[5], ClusterLabel::Noise);
    }

    #[test]
    fn test_scale_does_not_change_grouping() {
        let mut vectors = two_groups();
        for v in vectors.iter_mut().take(2) {
            for x in v.iter_mut() {
                *x *= 250.0;
            }
        }
        let scaled = Dbscan::new(0.1, 2).fit(&vectors);
        let plain = Dbscan::new(0.1, 2).fit(&two_groups());
        assert_eq!(scaled, plain);
    }

    #[test]
    fn test_border_points_join_through_core_point() {
        // points at 0, 20 and 40 degrees; only the middle one has 3 neighbors
        let at = |deg: f32| vec![deg.to_radians().cos(), deg.to_radians().sin()];
        let vectors = vec![at(0.0), at(20.0), at(40.0)];
        let labels = Dbscan::new(0.1, 3).fit(&vectors);
        assert_eq!(labels, vec![ClusterLabel::Cluster(0); 3]);

        let dbscan = Dbscan::new(0.1, 3);
        let neighborhoods = dbscan.neighborhoods(&vectors);
        assert_eq!(neighborhoods[0], vec![0, 1]);
        assert_eq!(neighborhoods[1], vec![0, 1, 2]);
    }

    proptest! {
        #[test]
        fn prop_repeated_runs_give_equivalent_partitions(
            vectors in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 4), 0..24),
            eps in 0.01f64..0.6,
            min_samples in 1usize..4,
        ) {
            let dbscan = Dbscan::new(eps, min_samples);
            let first = dbscan.fit(&vectors);
            let second = dbscan.fit(&vectors);
            prop_assert_eq!(first.len(), vectors.len());
            prop_assert!(partitions_equivalent(&first, &second));
        }

        #[test]
        fn prop_noise_points_have_sparse_neighborhoods(
            vectors in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 3), 1..16),
            eps in 0.01f64..0.6,
            min_samples in 2usize..4,
        ) {
            let dbscan = Dbscan::new(eps, min_samples);
            let labels = dbscan.fit(&vectors);
            let neighborhoods = dbscan.neighborhoods(&vectors);
            for (i, label) in labels.iter().enumerate() {
                if label.is_noise() {
                    prop_assert!(neighborhoods[i].len() < min_samples);
                }
            }
        }
    }
}
