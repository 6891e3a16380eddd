use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::ArticleId;

/// Failure talking to the embedding or summarization service
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Network failure, timeout, rate limit or server error
    #[error("transient service error: {0}")]
    Transient(String),
    /// The request can never succeed as sent
    #[error("permanent service error: {0}")]
    Permanent(String),
    /// The service answered but the payload failed validation
    #[error("invalid service response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Transient(_) | ServiceError::InvalidResponse(_))
    }

    /// Classify a `reqwest` transport error
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            ServiceError::Transient(err.to_string())
        } else if err.is_decode() {
            ServiceError::InvalidResponse(err.to_string())
        } else {
            ServiceError::Permanent(err.to_string())
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("{status} - {body}");
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            ServiceError::Transient(message)
        } else {
            ServiceError::Permanent(message)
        }
    }
}

/// Failure reported by the storage collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("issue {0} not found")]
    IssueNotFound(Uuid),
    #[error("article {0} not found")]
    ArticleNotFound(ArticleId),
    #[error("storage snapshot error: {0}")]
    Snapshot(String),
    #[error("store {0:?} is held by another pipeline process")]
    Locked(PathBuf),
}

/// Run-level failure that stops the remaining stages
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} stage failed: {reason}")]
    StageFatal { stage: Stage, reason: String },
    #[error("consistency violation in {stage} stage: {detail}")]
    ConsistencyViolation { stage: Stage, detail: String },
    #[error("another pipeline run holds the lock at {0:?}")]
    RunLocked(PathBuf),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("run artifact error: {0:#}")]
    Artifact(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn fatal(stage: Stage, reason: impl Into<String>) -> Self {
        PipelineError::StageFatal {
            stage,
            reason: reason.into(),
        }
    }
}

/// Pipeline stage names used in logs, errors and the failure ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Embedding,
    Clustering,
    IssueGeneration,
    Linkage,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Embedding => "embedding",
            Stage::Clustering => "clustering",
            Stage::IssueGeneration => "issue generation",
            Stage::Linkage => "linkage",
        };
        f.write_str(name)
    }
}

/// The item a failure is attributed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum FailedItem {
    Article(ArticleId),
    Cluster(u32),
    Issue(Uuid),
}

/// Kind of contained failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retries exhausted or the item can never be processed; skipped this run
    PermanentItem,
    /// Issue persisted with bias ratios but missing one or more summaries
    DegradedSummary,
    /// Bias ratios or article links do not reconcile; the cluster was halted
    ConsistencyViolation,
}

/// A single contained failure, kept for operator follow-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage: Stage,
    pub item: FailedItem,
    pub kind: FailureKind,
    pub message: String,
}

/// Per-run collection of contained failures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureLedger {
    pub entries: Vec<FailureRecord>,
}

impl FailureLedger {
    pub fn record(&mut self, record: FailureRecord) {
        self.entries.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = FailureRecord>) {
        self.entries.extend(records);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn for_stage(&self, stage: Stage) -> impl Iterator<Item = &FailureRecord> {
        self.entries.iter().filter(move |r| r.stage == stage)
    }

    /// Clusters with at least one recorded failure
    pub fn failed_clusters(&self) -> Vec<u32> {
        let mut clusters: Vec<u32> = self
            .entries
            .iter()
            .filter_map(|r| match r.item {
                FailedItem::Cluster(id) => Some(id),
                _ => None,
            })
            .collect();
        clusters.sort_unstable();
        clusters.dedup();
        clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ServiceError::Transient("timeout".into()).is_retryable());
        assert!(ServiceError::InvalidResponse("empty title".into()).is_retryable());
        assert!(!ServiceError::Permanent("bad request".into()).is_retryable());
    }

    #[test]
    fn test_status_classification() {
        let err = ServiceError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(err.is_retryable());
        let err = ServiceError::from_status(reqwest::StatusCode::BAD_GATEWAY, "");
        assert!(err.is_retryable());
        let err = ServiceError::from_status(reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert_eq!(err, ServiceError::Permanent("401 Unauthorized - bad key".into()));
    }

    #[test]
    fn test_failed_clusters_deduplicated() {
        let mut ledger = FailureLedger::default();
        for (item, kind) in [
            (FailedItem::Cluster(2), FailureKind::DegradedSummary),
            (FailedItem::Article("a".into()), FailureKind::PermanentItem),
            (FailedItem::Cluster(2), FailureKind::ConsistencyViolation),
            (FailedItem::Cluster(0), FailureKind::DegradedSummary),
        ] {
            ledger.record(FailureRecord {
                stage: Stage::IssueGeneration,
                item,
                kind,
                message: String::new(),
            });
        }
        assert_eq!(ledger.failed_clusters(), vec![0, 2]);
        assert_eq!(ledger.for_stage(Stage::Embedding).count(), 0);
    }

    #[test]
    fn test_ledger_serializes_tagged_items() {
        let record = FailureRecord {
            stage: Stage::Embedding,
            item: FailedItem::Article("a9".into()),
            kind: FailureKind::PermanentItem,
            message: "retries exhausted".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["item"]["type"], "article");
        assert_eq!(json["item"]["id"], "a9");
        assert_eq!(json["stage"], "embedding");
    }
}
