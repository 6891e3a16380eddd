use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{ArticleStore, LinkOutcome, MemoryStore, StoreSnapshot};
use crate::error::{PipelineError, StoreError};
use crate::lock::RunLock;
use crate::models::{Article, ArticleId, BiasSummary, CommonPoint, Issue};

/// Store backed by a JSON snapshot file, rewritten after every mutation.
///
/// Holds the snapshot's writer lock while open, so a second process (an
/// import or another run) cannot overwrite it with a stale copy.
pub struct JsonFileStore {
    path: PathBuf,
    _lock: RunLock,
    inner: MemoryStore,
    /// Serializes mutate-then-persist so snapshots never interleave
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the snapshot at `path`, starting empty when it does not exist
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let lock = RunLock::for_store(&path).map_err(|e| match e {
            PipelineError::RunLocked(lock_path) => StoreError::Locked(lock_path),
            other => StoreError::Unavailable(other.to_string()),
        })?;

        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<StoreSnapshot>(&bytes).map_err(|e| {
                StoreError::Snapshot(format!("failed to parse {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreSnapshot::default(),
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        debug!(
            "Loaded store {} ({} articles, {} issues)",
            path.display(),
            snapshot.articles.len(),
            snapshot.issues.len()
        );

        Ok(Self {
            path,
            _lock: lock,
            inner: MemoryStore::from_snapshot(snapshot),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    /// Add articles whose ids are not stored yet, returning how many were new
    pub async fn import_articles(
        &self,
        articles: impl IntoIterator<Item = Article>,
    ) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut added = 0;
        for article in articles {
            if self.inner.article(&article.id).await.is_none() {
                self.inner.insert_article(article).await;
                added += 1;
            }
        }
        if added > 0 {
            self.persist().await?;
        }
        Ok(added)
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let snapshot = self.inner.snapshot().await;
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| StoreError::Snapshot(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, bytes).await.map_err(|e| {
            StoreError::Unavailable(format!("failed to write {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            StoreError::Unavailable(format!("failed to replace {}: {e}", self.path.display()))
        })
    }
}

#[async_trait]
impl ArticleStore for JsonFileStore {
    async fn fetch_unclustered_articles(&self) -> Result<Vec<Article>, StoreError> {
        self.inner.fetch_unclustered_articles().await
    }

    async fn fetch_articles(&self, ids: &[ArticleId]) -> Result<Vec<Article>, StoreError> {
        self.inner.fetch_articles(ids).await
    }

    async fn find_issue_by_key(&self, key: Uuid) -> Result<Option<Issue>, StoreError> {
        self.inner.find_issue_by_key(key).await
    }

    async fn upsert_issue(
        &self,
        issue: Issue,
        summaries: Vec<BiasSummary>,
        points: Vec<CommonPoint>,
    ) -> Result<Uuid, StoreError> {
        let _guard = self.write_lock.lock().await;
        let id = self.inner.upsert_issue(issue, summaries, points).await?;
        self.persist().await?;
        Ok(id)
    }

    async fn set_article_issue(
        &self,
        article_id: &str,
        issue_id: Uuid,
    ) -> Result<LinkOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;
        let outcome = self.inner.set_article_issue(article_id, issue_id).await?;
        if outcome == LinkOutcome::Linked {
            self.persist().await?;
        }
        Ok(outcome)
    }

    async fn count_linked_articles(&self, issue_id: Uuid) -> Result<u32, StoreError> {
        self.inner.count_linked_articles(issue_id).await
    }

    async fn update_issue_metadata(
        &self,
        issue_id: Uuid,
        source_count: u32,
        image_url: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.inner
            .update_issue_metadata(issue_id, source_count, image_url, updated_at)
            .await?;
        self.persist().await
    }
}
