pub mod json;
pub mod memory;

pub use json::*;
pub use memory::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Article, ArticleId, BiasSummary, CommonPoint, Issue};

/// Result of a compare-and-set link of one article to an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The article had no issue and now references this one
    Linked,
    /// The article already referenced this issue
    AlreadyLinked,
    /// The article references a different issue and was left untouched
    Conflict(Uuid),
}

/// Read/write contract the pipeline needs from article and issue storage
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Articles that do not reference an issue yet
    async fn fetch_unclustered_articles(&self) -> Result<Vec<Article>, StoreError>;

    /// Articles with the given ids; unknown ids are skipped
    async fn fetch_articles(&self, ids: &[ArticleId]) -> Result<Vec<Article>, StoreError>;

    async fn find_issue_by_key(&self, key: Uuid) -> Result<Option<Issue>, StoreError>;

    /// Insert an issue with its summaries. If an issue with the same
    /// idempotency key exists, nothing is written and its id is returned.
    async fn upsert_issue(
        &self,
        issue: Issue,
        summaries: Vec<BiasSummary>,
        points: Vec<CommonPoint>,
    ) -> Result<Uuid, StoreError>;

    /// Set the article's issue reference unless it already holds one
    async fn set_article_issue(
        &self,
        article_id: &str,
        issue_id: Uuid,
    ) -> Result<LinkOutcome, StoreError>;

    async fn count_linked_articles(&self, issue_id: Uuid) -> Result<u32, StoreError>;

    async fn update_issue_metadata(
        &self,
        issue_id: Uuid,
        source_count: u32,
        image_url: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
