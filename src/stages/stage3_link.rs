use chrono::Utc;
use tracing::{info, warn};

use super::{order_members, RunContext, StageCounts};
use crate::error::{FailedItem, FailureKind, FailureRecord, PipelineError, Stage, StoreError};
use crate::models::{ClusterIssueLink, ClusterIssueMapping};
use crate::store::{ArticleStore, LinkOutcome};

/// Result of Stage 3 processing
#[derive(Debug, Default)]
pub struct Stage3Result {
    /// Articles that received their issue reference in this run
    pub linked: usize,
    /// Articles that already referenced the right issue
    pub already_linked: usize,
    /// Issues whose source count and image were refreshed
    pub issues_finalized: usize,
    pub failures: Vec<FailureRecord>,
    /// Store failure that stopped linkage; links not yet marked stay pending
    pub fatal: Option<PipelineError>,
}

impl Stage3Result {
    pub fn counts(&self) -> StageCounts {
        StageCounts {
            processed: self.linked,
            skipped: self.already_linked,
            failed: self.failures.len(),
        }
    }
}

/// Execute Stage 3: linkage
///
/// Sets the issue reference on every member article of each pending link,
/// then recomputes the issue's source count from what is actually linked.
/// Safe to repeat: links are compare-and-set and counts are recounted, so a
/// rerun after an interruption only touches what is left.
pub async fn execute_stage3(
    ctx: &RunContext,
    store: &dyn ArticleStore,
    mapping: &mut ClusterIssueMapping,
) -> Stage3Result {
    let mut result = Stage3Result::default();
    let pending = mapping.links.iter().filter(|l| !l.linked).count();

    info!(
        "Stage 3: linking {} issues (batch {})",
        pending,
        mapping.batch_id.unwrap_or(ctx.batch_id)
    );

    for link in mapping.links.iter_mut().filter(|l| !l.linked) {
        match link_issue(store, link, &mut result).await {
            Ok(()) => link.linked = true,
            Err(StoreError::IssueNotFound(id)) => {
                warn!("Cluster {}: issue {} no longer exists", link.cluster_id, id);
                result.failures.push(FailureRecord {
                    stage: Stage::Linkage,
                    item: FailedItem::Issue(id),
                    kind: FailureKind::PermanentItem,
                    message: format!("issue for cluster {} not found", link.cluster_id),
                });
            }
            Err(e) => {
                warn!("Stage 3 stopped at cluster {}: {}", link.cluster_id, e);
                result.fatal = Some(PipelineError::fatal(Stage::Linkage, e.to_string()));
                break;
            }
        }
    }

    info!(
        "Stage 3 complete: {} articles linked, {} already linked, {} issues finalized, {} failures",
        result.linked,
        result.already_linked,
        result.issues_finalized,
        result.failures.len()
    );

    result
}

async fn link_issue(
    store: &dyn ArticleStore,
    link: &ClusterIssueLink,
    result: &mut Stage3Result,
) -> Result<(), StoreError> {
    for article_id in &link.article_ids {
        match store.set_article_issue(article_id, link.issue_id).await {
            Ok(LinkOutcome::Linked) => result.linked += 1,
            Ok(LinkOutcome::AlreadyLinked) => result.already_linked += 1,
            Ok(LinkOutcome::Conflict(existing)) => {
                warn!(
                    "Article {} already belongs to issue {}, not linking to {}",
                    article_id, existing, link.issue_id
                );
                result.failures.push(FailureRecord {
                    stage: Stage::Linkage,
                    item: FailedItem::Article(article_id.clone()),
                    kind: FailureKind::ConsistencyViolation,
                    message: format!(
                        "linked to {existing}, cluster {} expected {}",
                        link.cluster_id, link.issue_id
                    ),
                });
            }
            Err(StoreError::ArticleNotFound(id)) => {
                result.failures.push(FailureRecord {
                    stage: Stage::Linkage,
                    item: FailedItem::Article(id),
                    kind: FailureKind::PermanentItem,
                    message: "article no longer exists".to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    let source_count = store.count_linked_articles(link.issue_id).await?;

    let mut members = store.fetch_articles(&link.article_ids).await?;
    members.retain(|a| a.issue_id == Some(link.issue_id));
    order_members(&mut members);
    let image_url = members.iter().find_map(|a| a.image()).map(str::to_string);

    store
        .update_issue_metadata(link.issue_id, source_count, image_url, Utc::now())
        .await?;
    result.issues_finalized += 1;
    Ok(())
}
