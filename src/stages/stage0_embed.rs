use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::{RunContext, StageCounts};
use crate::error::{FailedItem, FailureKind, FailureRecord, PipelineError, ServiceError, Stage};
use crate::llm::Embedder;
use crate::models::{Article, EmbeddingRecord};

/// Result of Stage 0 processing
#[derive(Debug, Default)]
pub struct Stage0Result {
    /// Vectors for every article that has one, sorted by article id
    pub records: Vec<EmbeddingRecord>,
    /// Articles whose stored embedding was used as-is
    pub cached: usize,
    /// Articles whose vector came from an earlier run's artifact
    pub reused: usize,
    /// Articles embedded by the service in this run
    pub embedded: usize,
    /// Articles left for a future run because the run was cancelled
    pub skipped: usize,
    /// Articles that could not be embedded
    pub failures: Vec<FailureRecord>,
    pub cancelled: bool,
}

impl Stage0Result {
    pub fn counts(&self) -> StageCounts {
        StageCounts {
            processed: self.records.len(),
            skipped: self.skipped,
            failed: self.failures.len(),
        }
    }
}

/// An article waiting for a vector
struct PendingText<'a> {
    article: &'a Article,
    text: String,
}

enum BatchOutcome {
    Done(Vec<EmbeddingRecord>, Vec<FailureRecord>),
    Cancelled(usize),
}

/// Execute Stage 0: embedding
///
/// 1. Build the title + body text for each unclustered article
/// 2. Reuse stored embeddings and still-valid artifact records
/// 3. Embed the rest in batches on a bounded pool, retrying transient errors
/// 4. Fall back to one request per article when a whole batch fails
pub async fn execute_stage0(
    ctx: &RunContext,
    embedder: &dyn Embedder,
    articles: &[Article],
    previous: &[EmbeddingRecord],
) -> Result<Stage0Result, PipelineError> {
    let config = &ctx.config.embed;
    let mut result = Stage0Result::default();

    let previous: HashMap<&str, &EmbeddingRecord> = previous
        .iter()
        .map(|r| (r.article_id.as_str(), r))
        .collect();

    let mut sorted: Vec<&Article> = articles.iter().filter(|a| a.is_unclustered()).collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut pending = Vec::new();
    for article in sorted {
        let text = article.embedding_text(config.max_input_chars);
        let text_length = text.chars().count();

        if text.is_empty() {
            result.failures.push(article_failure(article, "article has no text to embed"));
            continue;
        }

        if let Some(vector) = article.embedding.as_ref().filter(|v| !v.is_empty()) {
            result.records.push(record(article, vector.clone(), text_length));
            result.cached += 1;
            continue;
        }

        match previous.get(article.id.as_str()) {
            Some(prev) if prev.text_length == text_length && !prev.vector.is_empty() => {
                result.records.push(record(article, prev.vector.clone(), text_length));
                result.reused += 1;
            }
            _ => pending.push(PendingText { article, text }),
        }
    }

    info!(
        "Stage 0: {} articles to embed ({} cached, {} reused from artifact)",
        pending.len(),
        result.cached,
        result.reused
    );

    let batches: Vec<&[PendingText]> = pending.chunks(config.batch_size.max(1)).collect();
    let batch_count = batches.len();

    let outcomes: Vec<BatchOutcome> = stream::iter(batches.into_iter().enumerate())
        .map(|(index, batch)| async move {
            if ctx.is_cancelled() {
                return BatchOutcome::Cancelled(batch.len());
            }
            debug!("Embedding batch {}/{} ({} articles)", index + 1, batch_count, batch.len());
            embed_batch(ctx, embedder, batch).await
        })
        .buffer_unordered(config.concurrency.max(1))
        .collect()
        .await;

    for outcome in outcomes {
        match outcome {
            BatchOutcome::Done(records, failures) => {
                result.embedded += records.len();
                result.records.extend(records);
                result.failures.extend(failures);
            }
            BatchOutcome::Cancelled(n) => {
                result.skipped += n;
                result.cancelled = true;
            }
        }
    }

    result.records.sort_by(|a, b| a.article_id.cmp(&b.article_id));

    for failure in &result.failures {
        warn!("Embedding failed for {:?}: {}", failure.item, failure.message);
    }
    info!(
        "Stage 0 complete: {} vectors ({} new), {} failed, {} skipped",
        result.records.len(),
        result.embedded,
        result.failures.len(),
        result.skipped
    );

    if result.records.is_empty() && !articles.is_empty() && !result.cancelled {
        return Err(PipelineError::fatal(
            Stage::Embedding,
            format!("no vectors produced for {} articles", articles.len()),
        ));
    }

    Ok(result)
}

async fn embed_batch(
    ctx: &RunContext,
    embedder: &dyn Embedder,
    batch: &[PendingText<'_>],
) -> BatchOutcome {
    let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
    let texts = texts.as_slice();

    let attempt = ctx
        .config
        .retry
        .run("embed batch", Some(&ctx.cancel), move || embedder.embed_batch(texts))
        .await
        .and_then(|vectors| check_vectors(vectors, batch.len()));

    match attempt {
        Ok(vectors) => {
            let records = batch
                .iter()
                .zip(vectors)
                .map(|(p, v)| record(p.article, v, p.text.chars().count()))
                .collect();
            BatchOutcome::Done(records, Vec::new())
        }
        Err(err) if batch.len() > 1 && !ctx.is_cancelled() => {
            warn!(
                "Batch of {} failed ({}), embedding articles one at a time",
                batch.len(),
                err
            );
            let mut records = Vec::new();
            let mut failures = Vec::new();
            for pending in batch {
                match embed_one(ctx, embedder, pending).await {
                    Ok(rec) => records.push(rec),
                    Err(e) => failures.push(article_failure(pending.article, &e.to_string())),
                }
            }
            BatchOutcome::Done(records, failures)
        }
        Err(err) => {
            let failures = batch
                .iter()
                .map(|p| article_failure(p.article, &err.to_string()))
                .collect();
            BatchOutcome::Done(Vec::new(), failures)
        }
    }
}

async fn embed_one(
    ctx: &RunContext,
    embedder: &dyn Embedder,
    pending: &PendingText<'_>,
) -> Result<EmbeddingRecord, ServiceError> {
    let text = pending.text.as_str();
    let vector = ctx
        .config
        .retry
        .run(&format!("embed {}", pending.article.id), Some(&ctx.cancel), move || {
            embedder.embed(text)
        })
        .await?;
    let mut vectors = check_vectors(vec![vector], 1)?;
    Ok(record(pending.article, vectors.remove(0), text.chars().count()))
}

/// One non-empty vector per input
fn check_vectors(vectors: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Vec<f32>>, ServiceError> {
    if vectors.len() != expected {
        return Err(ServiceError::InvalidResponse(format!(
            "{} vectors for {} inputs",
            vectors.len(),
            expected
        )));
    }
    if vectors.iter().any(|v| v.is_empty()) {
        return Err(ServiceError::InvalidResponse("empty vector".to_string()));
    }
    Ok(vectors)
}

fn record(article: &Article, vector: Vec<f32>, text_length: usize) -> EmbeddingRecord {
    EmbeddingRecord {
        article_id: article.id.clone(),
        title: article.title.clone(),
        vector,
        text_length,
    }
}

fn article_failure(article: &Article, message: &str) -> FailureRecord {
    FailureRecord {
        stage: Stage::Embedding,
        item: FailedItem::Article(article.id.clone()),
        kind: FailureKind::PermanentItem,
        message: message.to_string(),
    }
}
