use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{FailureLedger, PipelineError, Stage};
use crate::io::RunArtifacts;
use crate::llm::{Embedder, Summarizer};
use crate::lock::RunLock;
use crate::models::{ClusterAssignment, ClusterIssueMapping, EmbeddingRecord};
use crate::stages::{
    execute_stage0, execute_stage1, execute_stage2, execute_stage3, RunContext, StageCounts,
};
use crate::store::ArticleStore;

/// A single stage selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Step {
    Embed,
    Cluster,
    Issues,
    Link,
}

/// Operator-facing report of one run, also written as `run_summary.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    pub articles_fetched: usize,
    /// Articles linked while finishing an interrupted run's mapping
    pub resumed_links: usize,
    pub embedding: StageCounts,
    pub clustering: StageCounts,
    pub issue_generation: StageCounts,
    pub linkage: StageCounts,
    pub clusters: usize,
    pub noise: usize,
    pub silhouette: Option<f64>,
    pub issues_created: usize,
    pub issues_reused: usize,
    pub issues_degraded: usize,
    pub failures: usize,
    /// Set when a run-level error stopped the remaining stages
    pub error: Option<String>,
}

impl RunSummary {
    fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            started_at: Utc::now(),
            finished_at: None,
            cancelled: false,
            articles_fetched: 0,
            resumed_links: 0,
            embedding: StageCounts::default(),
            clustering: StageCounts::default(),
            issue_generation: StageCounts::default(),
            linkage: StageCounts::default(),
            clusters: 0,
            noise: 0,
            silhouette: None,
            issues_created: 0,
            issues_reused: 0,
            issues_degraded: 0,
            failures: 0,
            error: None,
        }
    }

    fn log(&self) {
        for (name, counts) in [
            ("embedding", self.embedding),
            ("clustering", self.clustering),
            ("issue generation", self.issue_generation),
            ("linkage", self.linkage),
        ] {
            info!(
                "  {:<17} processed {:>5}  skipped {:>5}  failed {:>5}",
                name, counts.processed, counts.skipped, counts.failed
            );
        }
        info!(
            "  issues: {} created ({} degraded), {} reused; {} failures recorded",
            self.issues_created, self.issues_degraded, self.issues_reused, self.failures
        );
    }
}

/// Completed run: the summary plus every contained failure
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    pub ledger: FailureLedger,
}

/// Sequences the four stages, checkpointing artifacts between them
pub struct Orchestrator {
    config: PipelineConfig,
    store: Arc<dyn ArticleStore>,
    embedder: Arc<dyn Embedder>,
    summarizer: Arc<dyn Summarizer>,
    artifacts: RunArtifacts,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn ArticleStore>,
        embedder: Arc<dyn Embedder>,
        summarizer: Arc<dyn Summarizer>,
        artifacts: RunArtifacts,
    ) -> Self {
        Self {
            config,
            store,
            embedder,
            summarizer,
            artifacts,
        }
    }

    pub fn artifacts(&self) -> &RunArtifacts {
        &self.artifacts
    }

    /// Run every stage over the currently unclustered articles
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunReport, PipelineError> {
        self.execute(None, cancel).await
    }

    /// Run one stage against the persisted artifacts of earlier steps
    pub async fn run_step(
        &self,
        step: Step,
        cancel: CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        self.execute(Some(step), cancel).await
    }

    async fn execute(
        &self,
        step: Option<Step>,
        cancel: CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        self.config.validate()?;
        let _lock = RunLock::acquire(self.artifacts.dir())?;

        let mut ctx = RunContext::new(self.config.clone(), cancel);
        let mut summary = RunSummary::new(ctx.batch_id);
        info!("Pipeline run {} started", ctx.batch_id);

        let outcome = match step {
            None => self.run_all(&mut ctx, &mut summary).await,
            Some(Step::Embed) => self.embed(&mut ctx, &mut summary).await.map(|_| ()),
            Some(Step::Cluster) => self.cluster_from_artifacts(&mut ctx, &mut summary).await,
            Some(Step::Issues) => self.issues_from_artifacts(&mut ctx, &mut summary).await,
            Some(Step::Link) => self.link_from_artifacts(&mut ctx, &mut summary).await,
        };

        summary.cancelled = ctx.is_cancelled();
        summary.failures = ctx.ledger.len();
        summary.finished_at = Some(Utc::now());
        if let Err(e) = &outcome {
            warn!("Run {} stopped: {}", ctx.batch_id, e);
            summary.error = Some(e.to_string());
        }

        // reports never mask the error that stopped the run
        let mut write_error = None;
        if let Err(e) = self.artifacts.save_failures(&ctx.ledger) {
            warn!("Failed to write failure ledger: {:#}", e);
            write_error.get_or_insert(e);
        }
        if let Err(e) = self.artifacts.save_summary(&summary) {
            warn!("Failed to write run summary: {:#}", e);
            write_error.get_or_insert(e);
        }

        info!(
            "Pipeline run {} {}",
            ctx.batch_id,
            if summary.cancelled { "cancelled" } else { "finished" }
        );
        summary.log();

        outcome?;
        if let Some(e) = write_error {
            return Err(e.into());
        }
        Ok(RunReport {
            summary,
            ledger: ctx.ledger,
        })
    }

    async fn run_all(
        &self,
        ctx: &mut RunContext,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        if ctx.config.link.resume_pending {
            self.resume_pending_links(ctx, summary).await?;
        }

        let records = self.embed(ctx, summary).await?;
        if ctx.is_cancelled() {
            info!("Run cancelled after embedding; clustering skipped");
            return Ok(());
        }

        let previous = self.artifacts.load_assignments()?;
        let stage1 = execute_stage1(ctx, &records, previous.as_deref())?;
        self.artifacts.save_assignments(&stage1.assignments)?;
        summary.clustering = stage1.counts();
        summary.clusters = stage1.clusters;
        summary.noise = stage1.noise;
        summary.silhouette = stage1.silhouette;
        if ctx.is_cancelled() {
            return Ok(());
        }

        // issues written before a run-level error still get their links
        let (mut mapping, fatal) = self.issues(ctx, summary, &stage1.assignments).await?;
        let linked = self.link(ctx, summary, &mut mapping).await;
        match fatal {
            Some(e) => Err(e),
            None => linked,
        }
    }

    /// Finish linking issues from an interrupted run
    async fn resume_pending_links(
        &self,
        ctx: &mut RunContext,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let Some(mut mapping) = self.artifacts.load_mapping()? else {
            return Ok(());
        };
        if mapping.is_complete() {
            return Ok(());
        }

        info!(
            "Resuming {} unlinked issues from run {:?}",
            mapping.pending().count(),
            mapping.batch_id
        );
        let result = execute_stage3(ctx, self.store.as_ref(), &mut mapping).await;
        self.artifacts.save_mapping(&mapping)?;
        summary.resumed_links = result.linked;
        ctx.ledger.extend(result.failures);
        result.fatal.map_or(Ok(()), Err)
    }

    async fn embed(
        &self,
        ctx: &mut RunContext,
        summary: &mut RunSummary,
    ) -> Result<Vec<EmbeddingRecord>, PipelineError> {
        let articles = self
            .store
            .fetch_unclustered_articles()
            .await
            .map_err(|e| PipelineError::fatal(Stage::Embedding, e.to_string()))?;
        summary.articles_fetched = articles.len();

        let previous = self.artifacts.load_embeddings()?;
        let result = execute_stage0(ctx, self.embedder.as_ref(), &articles, &previous).await?;

        self.artifacts.save_embeddings(&result.records)?;
        summary.embedding = result.counts();
        ctx.ledger.extend(result.failures);
        Ok(result.records)
    }

    async fn issues(
        &self,
        ctx: &mut RunContext,
        summary: &mut RunSummary,
        assignments: &[ClusterAssignment],
    ) -> Result<(ClusterIssueMapping, Option<PipelineError>), PipelineError> {
        let result = execute_stage2(
            ctx,
            self.store.as_ref(),
            self.summarizer.as_ref(),
            assignments,
        )
        .await;

        self.artifacts.save_mapping(&result.mapping)?;
        summary.issue_generation = result.counts();
        summary.issues_created = result.created;
        summary.issues_reused = result.reused;
        summary.issues_degraded = result.degraded;
        ctx.ledger.extend(result.failures);
        Ok((result.mapping, result.fatal))
    }

    async fn link(
        &self,
        ctx: &mut RunContext,
        summary: &mut RunSummary,
        mapping: &mut ClusterIssueMapping,
    ) -> Result<(), PipelineError> {
        let result = execute_stage3(ctx, self.store.as_ref(), mapping).await;
        self.artifacts.save_mapping(mapping)?;
        summary.linkage = result.counts();
        ctx.ledger.extend(result.failures);
        result.fatal.map_or(Ok(()), Err)
    }

    async fn cluster_from_artifacts(
        &self,
        ctx: &mut RunContext,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let unclustered = self
            .store
            .fetch_unclustered_articles()
            .await
            .map_err(|e| PipelineError::fatal(Stage::Clustering, e.to_string()))?;
        summary.articles_fetched = unclustered.len();
        let ids: HashSet<&str> =
            unclustered.iter().map(|a| a.id.as_str()).collect();

        let mut records = self.artifacts.load_embeddings()?;
        records.retain(|r| ids.contains(r.article_id.as_str()));
        if records.is_empty() && !unclustered.is_empty() {
            return Err(PipelineError::fatal(
                Stage::Clustering,
                "no embedding artifact for the unclustered articles; run the embed step first",
            ));
        }

        let previous = self.artifacts.load_assignments()?;
        let result = execute_stage1(ctx, &records, previous.as_deref())?;
        self.artifacts.save_assignments(&result.assignments)?;
        summary.clustering = result.counts();
        summary.clusters = result.clusters;
        summary.noise = result.noise;
        summary.silhouette = result.silhouette;
        Ok(())
    }

    async fn issues_from_artifacts(
        &self,
        ctx: &mut RunContext,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let assignments = self.artifacts.load_assignments()?.ok_or_else(|| {
            PipelineError::fatal(
                Stage::IssueGeneration,
                "no cluster assignments; run the cluster step first",
            )
        })?;
        let (_, fatal) = self.issues(ctx, summary, &assignments).await?;
        fatal.map_or(Ok(()), Err)
    }

    async fn link_from_artifacts(
        &self,
        ctx: &mut RunContext,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let mut mapping = self.artifacts.load_mapping()?.ok_or_else(|| {
            PipelineError::fatal(
                Stage::Linkage,
                "no cluster to issue mapping; run the issues step first",
            )
        })?;
        self.link(ctx, summary, &mut mapping).await
    }
}
