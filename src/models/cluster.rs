use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ArticleId;

/// Label produced by the clustering stage.
///
/// Serialized as a plain integer where `-1` means noise, matching the
/// convention used by density-based clustering tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum ClusterLabel {
    Cluster(u32),
    Noise,
}

impl ClusterLabel {
    pub fn is_noise(&self) -> bool {
        matches!(self, ClusterLabel::Noise)
    }

    pub fn cluster_id(&self) -> Option<u32> {
        match self {
            ClusterLabel::Cluster(id) => Some(*id),
            ClusterLabel::Noise => None,
        }
    }
}

impl From<ClusterLabel> for i64 {
    fn from(label: ClusterLabel) -> Self {
        match label {
            ClusterLabel::Cluster(id) => id as i64,
            ClusterLabel::Noise => -1,
        }
    }
}

impl TryFrom<i64> for ClusterLabel {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(ClusterLabel::Noise),
            v if v >= 0 && v <= u32::MAX as i64 => Ok(ClusterLabel::Cluster(v as u32)),
            v => Err(format!("invalid cluster label: {v}")),
        }
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterLabel::Cluster(id) => write!(f, "{id}"),
            ClusterLabel::Noise => f.write_str("noise"),
        }
    }
}

/// Cluster membership of one article for a single run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub article_id: ArticleId,
    #[serde(rename = "cluster_id")]
    pub label: ClusterLabel,
}

/// Group assignments by cluster, dropping noise. Member ids are sorted so the
/// result does not depend on assignment order.
pub fn group_by_cluster(assignments: &[ClusterAssignment]) -> BTreeMap<u32, Vec<ArticleId>> {
    let mut clusters: BTreeMap<u32, Vec<ArticleId>> = BTreeMap::new();
    for assignment in assignments {
        if let ClusterLabel::Cluster(id) = assignment.label {
            clusters
                .entry(id)
                .or_default()
                .push(assignment.article_id.clone());
        }
    }
    for members in clusters.values_mut() {
        members.sort();
    }
    clusters
}

/// Link between a cluster of this run and the issue created for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterIssueLink {
    pub cluster_id: u32,
    pub issue_id: Uuid,
    /// Member articles in sorted order
    pub article_ids: Vec<ArticleId>,
    /// Set once the linkage stage has finished this issue
    #[serde(default)]
    pub linked: bool,
}

/// Cluster → issue mapping for one run, persisted between the issue and
/// linkage stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterIssueMapping {
    pub batch_id: Option<Uuid>,
    pub links: Vec<ClusterIssueLink>,
}

impl ClusterIssueMapping {
    pub fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id: Some(batch_id),
            links: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.links.iter().all(|l| l.linked)
    }

    pub fn pending(&self) -> impl Iterator<Item = &ClusterIssueLink> {
        self.links.iter().filter(|l| !l.linked)
    }
}
