use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ArticleStore, LinkOutcome};
use crate::error::StoreError;
use crate::models::{Article, ArticleId, BiasSummary, CommonPoint, Issue};

/// Serializable contents of a store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub articles: Vec<Article>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub bias_summaries: Vec<BiasSummary>,
    #[serde(default)]
    pub common_points: Vec<CommonPoint>,
}

#[derive(Debug, Default)]
struct StoreState {
    articles: BTreeMap<ArticleId, Article>,
    issues: BTreeMap<Uuid, Issue>,
    bias_summaries: Vec<BiasSummary>,
    common_points: Vec<CommonPoint>,
}

impl StoreState {
    fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            articles: snapshot
                .articles
                .into_iter()
                .map(|a| (a.id.clone(), a))
                .collect(),
            issues: snapshot.issues.into_iter().map(|i| (i.id, i)).collect(),
            bias_summaries: snapshot.bias_summaries,
            common_points: snapshot.common_points,
        }
    }

    fn to_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            articles: self.articles.values().cloned().collect(),
            issues: self.issues.values().cloned().collect(),
            bias_summaries: self.bias_summaries.clone(),
            common_points: self.common_points.clone(),
        }
    }
}

/// In-process store guarded by a tokio `RwLock`
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_articles(articles: impl IntoIterator<Item = Article>) -> Self {
        Self::from_snapshot(StoreSnapshot {
            articles: articles.into_iter().collect(),
            ..Default::default()
        })
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            state: RwLock::new(StoreState::from_snapshot(snapshot)),
        }
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.read().await.to_snapshot()
    }

    /// Add or replace an article
    pub async fn insert_article(&self, article: Article) {
        let mut state = self.state.write().await;
        state.articles.insert(article.id.clone(), article);
    }

    pub async fn article(&self, id: &str) -> Option<Article> {
        self.state.read().await.articles.get(id).cloned()
    }

    pub async fn issue(&self, id: Uuid) -> Option<Issue> {
        self.state.read().await.issues.get(&id).cloned()
    }

    pub async fn issues(&self) -> Vec<Issue> {
        self.state.read().await.issues.values().cloned().collect()
    }

    pub async fn bias_summaries(&self, issue_id: Uuid) -> Vec<BiasSummary> {
        let state = self.state.read().await;
        state
            .bias_summaries
            .iter()
            .filter(|s| s.issue_id == issue_id)
            .cloned()
            .collect()
    }

    pub async fn common_points(&self, issue_id: Uuid) -> Vec<CommonPoint> {
        let state = self.state.read().await;
        state
            .common_points
            .iter()
            .filter(|p| p.issue_id == issue_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn fetch_unclustered_articles(&self) -> Result<Vec<Article>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .articles
            .values()
            .filter(|a| a.is_unclustered())
            .cloned()
            .collect())
    }

    async fn fetch_articles(&self, ids: &[ArticleId]) -> Result<Vec<Article>, StoreError> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.articles.get(id).cloned())
            .collect())
    }

    async fn find_issue_by_key(&self, key: Uuid) -> Result<Option<Issue>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .issues
            .values()
            .find(|i| i.idempotency_key == key)
            .cloned())
    }

    async fn upsert_issue(
        &self,
        issue: Issue,
        summaries: Vec<BiasSummary>,
        points: Vec<CommonPoint>,
    ) -> Result<Uuid, StoreError> {
        let mut state = self.state.write().await;

        if let Some(existing) = state
            .issues
            .values()
            .find(|i| i.idempotency_key == issue.idempotency_key)
        {
            return Ok(existing.id);
        }

        let id = issue.id;
        state.issues.insert(id, issue);
        state
            .bias_summaries
            .extend(summaries.into_iter().map(|s| BiasSummary { issue_id: id, ..s }));
        state
            .common_points
            .extend(points.into_iter().map(|p| CommonPoint { issue_id: id, ..p }));
        Ok(id)
    }

    async fn set_article_issue(
        &self,
        article_id: &str,
        issue_id: Uuid,
    ) -> Result<LinkOutcome, StoreError> {
        let mut state = self.state.write().await;

        if !state.issues.contains_key(&issue_id) {
            return Err(StoreError::IssueNotFound(issue_id));
        }
        let article = state
            .articles
            .get_mut(article_id)
            .ok_or_else(|| StoreError::ArticleNotFound(article_id.to_string()))?;

        Ok(match article.issue_id {
            None => {
                article.issue_id = Some(issue_id);
                LinkOutcome::Linked
            }
            Some(existing) if existing == issue_id => LinkOutcome::AlreadyLinked,
            Some(existing) => LinkOutcome::Conflict(existing),
        })
    }

    async fn count_linked_articles(&self, issue_id: Uuid) -> Result<u32, StoreError> {
        let state = self.state.read().await;
        let count = state
            .articles
            .values()
            .filter(|a| a.issue_id == Some(issue_id))
            .count();
        Ok(count as u32)
    }

    async fn update_issue_metadata(
        &self,
        issue_id: Uuid,
        source_count: u32,
        image_url: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let issue = state
            .issues
            .get_mut(&issue_id)
            .ok_or(StoreError::IssueNotFound(issue_id))?;
        issue.source_count = source_count;
        if image_url.is_some() {
            issue.image_url = image_url;
        }
        issue.updated_at = updated_at;
        Ok(())
    }
}
