use std::collections::{BTreeMap, HashMap};

use tracing::{info, warn};

use super::{RunContext, StageCounts};
use crate::clustering::{label_counts, partitions_equivalent, silhouette_score, Dbscan};
use crate::error::{PipelineError, Stage};
use crate::models::{ClusterAssignment, ClusterLabel, EmbeddingRecord};

/// Titles logged per cluster in the analysis summary
const SAMPLE_TITLES: usize = 3;

/// Result of Stage 1 processing
#[derive(Debug, Default)]
pub struct Stage1Result {
    /// One assignment per input record, sorted by article id
    pub assignments: Vec<ClusterAssignment>,
    pub clusters: usize,
    pub noise: usize,
    /// Cosine silhouette over clustered points, when it is defined
    pub silhouette: Option<f64>,
    /// Whether the partition matches the previous artifact over the same
    /// articles; `None` when there is nothing comparable
    pub matches_previous: Option<bool>,
}

impl Stage1Result {
    pub fn counts(&self) -> StageCounts {
        StageCounts {
            processed: self.assignments.len() - self.noise,
            skipped: self.noise,
            failed: 0,
        }
    }
}

/// Execute Stage 1: density-based clustering under cosine distance
///
/// Records are ordered by article id before clustering so identical input
/// always yields identical labels.
pub fn execute_stage1(
    ctx: &RunContext,
    records: &[EmbeddingRecord],
    previous: Option<&[ClusterAssignment]>,
) -> Result<Stage1Result, PipelineError> {
    let config = &ctx.config.cluster;

    if records.is_empty() {
        info!("Stage 1: no vectors to cluster");
        return Ok(Stage1Result::default());
    }

    let dimension = records[0].dimension();
    if dimension == 0 {
        return Err(PipelineError::fatal(
            Stage::Clustering,
            format!("article {} has an empty vector", records[0].article_id),
        ));
    }
    if let Some(bad) = records.iter().find(|r| r.dimension() != dimension) {
        return Err(PipelineError::fatal(
            Stage::Clustering,
            format!(
                "article {} has dimension {}, expected {}",
                bad.article_id,
                bad.dimension(),
                dimension
            ),
        ));
    }

    let mut sorted: Vec<&EmbeddingRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.article_id.cmp(&b.article_id));
    if let Some(pair) = sorted.windows(2).find(|w| w[0].article_id == w[1].article_id) {
        return Err(PipelineError::fatal(
            Stage::Clustering,
            format!("duplicate vector for article {}", pair[0].article_id),
        ));
    }

    info!(
        "Stage 1: clustering {} vectors (eps={}, min_samples={})",
        sorted.len(),
        config.eps,
        config.min_samples
    );

    let vectors: Vec<Vec<f32>> = sorted.iter().map(|r| r.vector.clone()).collect();
    let labels = Dbscan::new(config.eps, config.min_samples).fit(&vectors);
    let (clusters, noise) = label_counts(&labels);
    let silhouette = silhouette_score(&vectors, &labels);

    let assignments: Vec<ClusterAssignment> = sorted
        .iter()
        .zip(&labels)
        .map(|(r, label)| ClusterAssignment {
            article_id: r.article_id.clone(),
            label: *label,
        })
        .collect();

    match silhouette {
        Some(score) => info!(
            "Stage 1 complete: {} clusters, {} noise, silhouette {:.3}",
            clusters, noise, score
        ),
        None => info!("Stage 1 complete: {} clusters, {} noise", clusters, noise),
    }
    log_cluster_analysis(&sorted, &labels);

    let matches_previous = previous.and_then(|prev| compare_with_previous(&assignments, prev));
    if matches_previous == Some(false) {
        warn!("Partition differs from the previous assignment over the same articles");
    }

    Ok(Stage1Result {
        assignments,
        clusters,
        noise,
        silhouette,
        matches_previous,
    })
}

/// Compare labels when the previous artifact covers exactly the same articles
fn compare_with_previous(
    current: &[ClusterAssignment],
    previous: &[ClusterAssignment],
) -> Option<bool> {
    if current.len() != previous.len() {
        return None;
    }
    let previous: HashMap<&str, ClusterLabel> = previous
        .iter()
        .map(|a| (a.article_id.as_str(), a.label))
        .collect();

    let mut old = Vec::with_capacity(current.len());
    for assignment in current {
        old.push(*previous.get(assignment.article_id.as_str())?);
    }
    let new: Vec<ClusterLabel> = current.iter().map(|a| a.label).collect();
    Some(partitions_equivalent(&new, &old))
}

fn log_cluster_analysis(records: &[&EmbeddingRecord], labels: &[ClusterLabel]) {
    let mut members: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
    for (record, label) in records.iter().zip(labels) {
        if let ClusterLabel::Cluster(id) = label {
            members.entry(*id).or_default().push(record.title.as_str());
        }
    }

    for (id, titles) in &members {
        let samples: Vec<&str> = titles.iter().take(SAMPLE_TITLES).copied().collect();
        info!("Cluster {}: {} articles, e.g. {:?}", id, titles.len(), samples);
    }
}
