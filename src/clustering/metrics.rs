use std::collections::BTreeMap;

use crate::models::ClusterLabel;

/// Scale a vector to unit length. Zero vectors stay zero.
pub fn normalize(vector: &[f32]) -> Vec<f64> {
    let norm = vector
        .iter()
        .map(|&x| (x as f64) * (x as f64))
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return vec![0.0; vector.len()];
    }
    vector.iter().map(|&x| x as f64 / norm).collect()
}

/// Cosine similarity between two vectors; 0.0 when either is a zero vector
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    unit_similarity(&normalize(a), &normalize(b))
}

/// Cosine distance `1 - similarity`, clamped to `[0, 2]`
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    unit_distance(&normalize(a), &normalize(b))
}

fn unit_similarity(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub(crate) fn unit_distance(a: &[f64], b: &[f64]) -> f64 {
    (1.0 - unit_similarity(a, b)).clamp(0.0, 2.0)
}

/// Full pairwise cosine distance matrix
pub fn distance_matrix(vectors: &[Vec<f32>]) -> Vec<Vec<f64>> {
    let units: Vec<Vec<f64>> = vectors.iter().map(|v| normalize(v)).collect();
    let n = units.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = unit_distance(&units[i], &units[j]);
            matrix[i][j] = d;
            matrix[j][i] = d;
        }
    }
    matrix
}

/// Count clusters and noise points in a labelling
pub fn label_counts(labels: &[ClusterLabel]) -> (usize, usize) {
    let mut clusters = std::collections::HashSet::new();
    let mut noise = 0;
    for label in labels {
        match label {
            ClusterLabel::Cluster(id) => {
                clusters.insert(*id);
            }
            ClusterLabel::Noise => noise += 1,
        }
    }
    (clusters.len(), noise)
}

/// Mean silhouette coefficient under cosine distance.
///
/// Noise points are left out. Returns `None` when fewer than two clusters
/// remain or every clustered point is its own cluster.
pub fn silhouette_score(vectors: &[Vec<f32>], labels: &[ClusterLabel]) -> Option<f64> {
    let clustered: Vec<(usize, u32)> = labels
        .iter()
        .enumerate()
        .filter_map(|(i, l)| l.cluster_id().map(|id| (i, id)))
        .collect();

    let mut members: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for &(i, id) in &clustered {
        members.entry(id).or_default().push(i);
    }
    if members.len() < 2 || members.len() == clustered.len() {
        return None;
    }

    let distances = distance_matrix(vectors);
    let mut total = 0.0;

    for &(i, own) in &clustered {
        let own_members = &members[&own];
        if own_members.len() == 1 {
            // singleton clusters score 0
            continue;
        }
        let a = own_members
            .iter()
            .filter(|&&j| j != i)
            .map(|&j| distances[i][j])
            .sum::<f64>()
            / (own_members.len() - 1) as f64;

        let b = members
            .iter()
            .filter(|(id, _)| **id != own)
            .map(|(_, other)| {
                other.iter().map(|&j| distances[i][j]).sum::<f64>() / other.len() as f64
            })
            .fold(f64::INFINITY, f64::min);

        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }

    Some(total / clustered.len() as f64)
}

/// Sorted distance from every point to its `k`-th nearest neighbor, the
/// point itself counting as the first. Used to pick a radius by eye.
pub fn k_distances(vectors: &[Vec<f32>], k: usize) -> Vec<f64> {
    if k == 0 || vectors.len() < k {
        return Vec::new();
    }
    let distances = distance_matrix(vectors);
    let mut result: Vec<f64> = distances
        .into_iter()
        .map(|mut row| {
            row.sort_by(|a, b| a.total_cmp(b));
            row[k - 1]
        })
        .collect();
    result.sort_by(|a, b| a.total_cmp(b));
    result
}
