use std::collections::BTreeMap;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{RunContext, StageCounts};
use crate::error::{FailedItem, FailureKind, FailureRecord, PipelineError, Stage};
use crate::llm::{
    validate_neutral, validate_points, ArticleDigest, Summarizer, BIAS_SUMMARY_PROMPT,
    COMMON_POINTS_PROMPT, NEUTRAL_SUMMARY_PROMPT,
};
use crate::models::{
    group_by_cluster, issue_key, Article, ArticleId, Bias, BiasSummary, ClusterAssignment,
    ClusterIssueLink, ClusterIssueMapping, CommonPoint, Issue, NeutralSummary, SummaryStatus,
};
use crate::store::ArticleStore;

/// Allowed drift of the three percentages from 100
const PCT_TOLERANCE: f64 = 0.01;

/// Hundredths of a percent in a whole
const WHOLE: u64 = 10_000;

/// Left/center/right mix of a cluster's member articles
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasRatio {
    pub left_pct: f64,
    pub center_pct: f64,
    pub right_pct: f64,
    pub dominant: Bias,
}

impl BiasRatio {
    pub fn pct(&self, bias: Bias) -> f64 {
        match bias {
            Bias::Left => self.left_pct,
            Bias::Center => self.center_pct,
            Bias::Right => self.right_pct,
        }
    }

    pub fn sum(&self) -> f64 {
        self.left_pct + self.center_pct + self.right_pct
    }
}

/// Compute the bias mix of `biases`.
///
/// Each share is rounded to two decimals in integer hundredths; whatever the
/// rounding leaves over (or takes too much) goes to the largest bucket, so
/// the three always sum to exactly 100. The dominant label is the one with
/// the most articles, ties resolved center, then left, then right.
pub fn compute_bias_ratio(biases: &[Bias]) -> Option<BiasRatio> {
    if biases.is_empty() {
        return None;
    }
    let total = biases.len() as u64;

    let count = |bias: Bias| biases.iter().filter(|b| **b == bias).count() as u64;
    let counts = [count(Bias::Left), count(Bias::Center), count(Bias::Right)];

    // round half up: (c * WHOLE / total) to the nearest integer
    let mut shares: [i64; 3] = counts.map(|c| ((2 * c * WHOLE + total) / (2 * total)) as i64);

    let dominant = Bias::PRIORITY
        .into_iter()
        .max_by(|a, b| {
            counts[index(*a)]
                .cmp(&counts[index(*b)])
                .then(b.priority().cmp(&a.priority()))
        })
        .unwrap_or_default();

    let remainder = WHOLE as i64 - shares.iter().sum::<i64>();
    shares[index(dominant)] += remainder;

    Some(BiasRatio {
        left_pct: shares[0] as f64 / 100.0,
        center_pct: shares[1] as f64 / 100.0,
        right_pct: shares[2] as f64 / 100.0,
        dominant,
    })
}

fn index(bias: Bias) -> usize {
    match bias {
        Bias::Left => 0,
        Bias::Center => 1,
        Bias::Right => 2,
    }
}

/// Check that a ratio reconciles with the member count it came from
pub fn verify_bias_ratio(ratio: &BiasRatio, members: usize) -> Result<(), String> {
    if members == 0 {
        return Err("bias ratio computed for an empty cluster".to_string());
    }
    let sum = ratio.sum();
    if (sum - 100.0).abs() > PCT_TOLERANCE {
        return Err(format!("bias percentages sum to {sum:.2}"));
    }
    for bias in Bias::ALL {
        let pct = ratio.pct(bias);
        if !(0.0..=100.0).contains(&pct) {
            return Err(format!("{bias} percentage {pct:.2} out of range"));
        }
    }
    Ok(())
}

/// Stable member order: newest first, undated last, then article id
pub fn order_members(articles: &mut [Article]) {
    articles.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Up to `per_bias` articles for each represented label, in member order
pub fn sample_by_bias(articles: &[Article], per_bias: usize) -> BTreeMap<Bias, Vec<&Article>> {
    let mut samples: BTreeMap<Bias, Vec<&Article>> = BTreeMap::new();
    for article in articles {
        let bucket = samples.entry(article.bias).or_default();
        if bucket.len() < per_bias {
            bucket.push(article);
        }
    }
    samples
}

/// Interleave per-bias samples so every side appears early in the prompt
pub fn sample_across_biases<'a>(samples: &BTreeMap<Bias, Vec<&'a Article>>) -> Vec<&'a Article> {
    let longest = samples.values().map(Vec::len).max().unwrap_or(0);
    let mut mixed = Vec::new();
    for i in 0..longest {
        for bias in Bias::PRIORITY {
            if let Some(article) = samples.get(&bias).and_then(|s| s.get(i)) {
                mixed.push(*article);
            }
        }
    }
    mixed
}

/// Result of Stage 2 processing
#[derive(Debug, Default)]
pub struct Stage2Result {
    pub mapping: ClusterIssueMapping,
    /// Issues written in this run
    pub created: usize,
    /// Clusters whose issue already existed from an earlier run
    pub reused: usize,
    /// Created issues missing at least one summary
    pub degraded: usize,
    /// Clusters dropped for a consistency violation or missing members
    pub halted: usize,
    /// Clusters too small to form an issue
    pub too_small: usize,
    /// Clusters not started because the run was cancelled
    pub cancelled: usize,
    pub failures: Vec<FailureRecord>,
    /// Run-level error hit by some cluster. Issues written by the other
    /// clusters are still in `mapping` and must be recorded before this is
    /// propagated.
    pub fatal: Option<PipelineError>,
}

impl Stage2Result {
    pub fn counts(&self) -> StageCounts {
        StageCounts {
            processed: self.created + self.reused,
            skipped: self.too_small + self.cancelled,
            failed: self.halted + self.degraded,
        }
    }
}

enum ClusterOutcome {
    Created {
        link: ClusterIssueLink,
        degraded: Option<FailureRecord>,
    },
    Existing(ClusterIssueLink),
    Halted(FailureRecord),
    Cancelled,
}

/// Execute Stage 2: issue generation
///
/// For each cluster with at least two members:
/// 1. Compute and verify the bias ratio
/// 2. Sample representative articles per bias
/// 3. Request the neutral summary, one summary per represented bias and
///    the common points, each retried on its own
/// 4. Persist the issue even when some summaries failed
///
/// A store failure in one cluster does not discard the others: it is
/// returned in [`Stage2Result::fatal`] next to the issues already written.
pub async fn execute_stage2(
    ctx: &RunContext,
    store: &dyn ArticleStore,
    summarizer: &dyn Summarizer,
    assignments: &[ClusterAssignment],
) -> Stage2Result {
    let mut result = Stage2Result {
        mapping: ClusterIssueMapping::new(ctx.batch_id),
        ..Default::default()
    };

    let clusters = group_by_cluster(assignments);
    let (eligible, small): (Vec<_>, Vec<_>) =
        clusters.into_iter().partition(|(_, members)| members.len() >= 2);
    result.too_small = small.len();

    info!(
        "Stage 2: generating issues for {} clusters ({} too small)",
        eligible.len(),
        result.too_small
    );

    let outcomes: Vec<Result<ClusterOutcome, PipelineError>> = stream::iter(eligible)
        .map(|(cluster_id, members)| async move {
            if ctx.is_cancelled() {
                return Ok(ClusterOutcome::Cancelled);
            }
            process_cluster(ctx, store, summarizer, cluster_id, members).await
        })
        .buffer_unordered(ctx.config.issues.concurrency.max(1))
        .collect()
        .await;

    for outcome in outcomes {
        match outcome {
            Ok(ClusterOutcome::Created { link, degraded }) => {
                result.created += 1;
                if let Some(failure) = degraded {
                    result.degraded += 1;
                    result.failures.push(failure);
                }
                result.mapping.links.push(link);
            }
            Ok(ClusterOutcome::Existing(link)) => {
                result.reused += 1;
                result.mapping.links.push(link);
            }
            Ok(ClusterOutcome::Halted(failure)) => {
                result.halted += 1;
                result.failures.push(failure);
            }
            Ok(ClusterOutcome::Cancelled) => result.cancelled += 1,
            Err(e) => {
                warn!("Stage 2: run-level error: {}", e);
                result.fatal.get_or_insert(e);
            }
        }
    }

    result.mapping.links.sort_by_key(|l| l.cluster_id);
    result.failures.sort_by_key(|f| match f.item {
        FailedItem::Cluster(id) => id,
        _ => u32::MAX,
    });

    info!(
        "Stage 2 complete: {} created ({} degraded), {} reused, {} halted, {} cancelled",
        result.created, result.degraded, result.reused, result.halted, result.cancelled
    );

    result
}

async fn process_cluster(
    ctx: &RunContext,
    store: &dyn ArticleStore,
    summarizer: &dyn Summarizer,
    cluster_id: u32,
    member_ids: Vec<ArticleId>,
) -> Result<ClusterOutcome, PipelineError> {
    let config = &ctx.config.issues;
    let key = issue_key(&member_ids);

    let mut articles = store.fetch_articles(&member_ids).await?;
    if articles.len() != member_ids.len() {
        return Ok(ClusterOutcome::Halted(cluster_failure(
            cluster_id,
            FailureKind::PermanentItem,
            format!(
                "{} of {} member articles not found",
                member_ids.len() - articles.len(),
                member_ids.len()
            ),
        )));
    }

    let existing = store.find_issue_by_key(key).await?;
    let existing_id = existing.as_ref().map(|i| i.id);
    if let Some(article) = articles
        .iter()
        .find(|a| a.issue_id.is_some() && a.issue_id != existing_id)
    {
        let detail = format!(
            "article {} already belongs to issue {}",
            article.id,
            article.issue_id.unwrap_or_default()
        );
        warn!("Cluster {}: {}", cluster_id, detail);
        return Ok(ClusterOutcome::Halted(cluster_failure(
            cluster_id,
            FailureKind::ConsistencyViolation,
            detail,
        )));
    }

    let link = |issue_id: Uuid| ClusterIssueLink {
        cluster_id,
        issue_id,
        article_ids: member_ids.clone(),
        linked: false,
    };

    if let Some(issue) = existing {
        info!("Cluster {}: reusing issue {}", cluster_id, issue.id);
        return Ok(ClusterOutcome::Existing(link(issue.id)));
    }

    let biases: Vec<Bias> = articles.iter().map(|a| a.bias).collect();
    let ratio = compute_bias_ratio(&biases)
        .ok_or_else(|| "no member articles".to_string())
        .and_then(|r| verify_bias_ratio(&r, articles.len()).map(|_| r));
    let ratio = match ratio {
        Ok(ratio) => ratio,
        Err(detail) => {
            warn!("Cluster {}: {}", cluster_id, detail);
            return Ok(ClusterOutcome::Halted(cluster_failure(
                cluster_id,
                FailureKind::ConsistencyViolation,
                detail,
            )));
        }
    };

    order_members(&mut articles);
    let samples = sample_by_bias(&articles, config.max_samples_per_bias);
    let digest = |a: &&Article| ArticleDigest::from_article(a, config.excerpt_chars);
    let mixed: Vec<ArticleDigest> = sample_across_biases(&samples).iter().map(digest).collect();

    let mut problems = Vec::new();
    let summaries = Summaries::request(ctx, summarizer, &mixed, &samples, &mut problems).await;

    if !problems.is_empty() && ctx.is_cancelled() {
        debug!("Cluster {}: cancelled during summarization", cluster_id);
        return Ok(ClusterOutcome::Cancelled);
    }

    let issue = Issue {
        id: Uuid::new_v4(),
        idempotency_key: key,
        title: summaries.neutral.as_ref().map(|n| n.title.clone()),
        summary: summaries.neutral.as_ref().map(|n| n.summary.clone()),
        summary_status: if problems.is_empty() {
            SummaryStatus::Complete
        } else {
            SummaryStatus::Degraded
        },
        image_url: articles.iter().find_map(|a| a.image()).map(str::to_string),
        bias_left_pct: ratio.left_pct,
        bias_center_pct: ratio.center_pct,
        bias_right_pct: ratio.right_pct,
        dominant_bias: ratio.dominant,
        source_count: 0,
        updated_at: Utc::now(),
    };
    let issue_ref = issue.id;
    let bias_summaries = summaries
        .by_bias
        .into_iter()
        .map(|(bias, bullets)| BiasSummary {
            issue_id: issue_ref,
            bias,
            bullets,
        })
        .collect();
    let common_points = summaries
        .common_points
        .into_iter()
        .map(|text| CommonPoint {
            issue_id: issue_ref,
            text,
        })
        .collect();

    let issue_id = store.upsert_issue(issue, bias_summaries, common_points).await?;

    info!(
        "Cluster {}: issue {} ({} articles, dominant {}, L/C/R {:.2}/{:.2}/{:.2})",
        cluster_id,
        issue_id,
        articles.len(),
        ratio.dominant,
        ratio.left_pct,
        ratio.center_pct,
        ratio.right_pct
    );

    let degraded = if problems.is_empty() {
        None
    } else {
        warn!("Cluster {}: degraded summary: {}", cluster_id, problems.join("; "));
        Some(cluster_failure(
            cluster_id,
            FailureKind::DegradedSummary,
            problems.join("; "),
        ))
    };

    Ok(ClusterOutcome::Created {
        link: link(issue_id),
        degraded,
    })
}

/// Validated output of the summarization calls for one cluster
#[derive(Debug, Default)]
struct Summaries {
    neutral: Option<NeutralSummary>,
    by_bias: Vec<(Bias, Vec<String>)>,
    common_points: Vec<String>,
}

impl Summaries {
    async fn request(
        ctx: &RunContext,
        summarizer: &dyn Summarizer,
        mixed: &[ArticleDigest],
        samples: &BTreeMap<Bias, Vec<&Article>>,
        problems: &mut Vec<String>,
    ) -> Self {
        let config = &ctx.config.issues;
        let validation = &config.validation;
        let retry = &ctx.config.retry;
        let cancel = Some(&ctx.cancel);
        let mut summaries = Summaries::default();

        let neutral = retry
            .run("neutral summary", cancel, move || async move {
                let raw = summarizer.summarize(NEUTRAL_SUMMARY_PROMPT, mixed).await?;
                validate_neutral(raw, validation)
            })
            .await;
        match neutral {
            Ok(n) => summaries.neutral = Some(n),
            Err(e) => problems.push(format!("neutral summary: {e}")),
        }

        for bias in Bias::PRIORITY {
            let Some(members) = samples.get(&bias) else {
                continue;
            };
            let digests: Vec<ArticleDigest> = members
                .iter()
                .map(|a| ArticleDigest::from_article(a, config.excerpt_chars))
                .collect();
            let digests = digests.as_slice();
            let bullets = retry
                .run(&format!("{bias} summary"), cancel, move || async move {
                    let raw = summarizer
                        .summarize_bias(BIAS_SUMMARY_PROMPT, digests, bias)
                        .await?;
                    validate_points(raw, validation.max_bullets, false)
                })
                .await;
            match bullets {
                Ok(b) => summaries.by_bias.push((bias, b)),
                Err(e) => problems.push(format!("{bias} summary: {e}")),
            }
        }

        if samples.len() >= 2 {
            let points = retry
                .run("common points", cancel, move || async move {
                    let raw = summarizer
                        .extract_common_points(COMMON_POINTS_PROMPT, mixed)
                        .await?;
                    validate_points(raw, validation.max_common_points, true)
                })
                .await;
            match points {
                Ok(p) => summaries.common_points = p,
                Err(e) => problems.push(format!("common points: {e}")),
            }
        }

        summaries
    }
}

fn cluster_failure(cluster_id: u32, kind: FailureKind, message: String) -> FailureRecord {
    FailureRecord {
        stage: Stage::IssueGeneration,
        item: FailedItem::Cluster(cluster_id),
        kind,
        message,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::PipelineConfig;
    use crate::error::ServiceError;
    use crate::retry::RetryPolicy;
    use crate::store::MemoryStore;

    /// Echoes article titles back; any prompt holding a title with "FAIL"
    /// is rejected permanently
    struct EchoSummarizer;

    fn check(articles: &[ArticleDigest]) -> Result<(), ServiceError> {
        if articles.iter().any(|a| a.title.contains("FAIL")) {
            return Err(ServiceError::Permanent("400 - refused".into()));
        }
        Ok(())
    }

    #[async_trait]
    impl Summarizer for EchoSummarizer {
        async fn summarize(
            &self,
            _prompt: &str,
            articles: &[ArticleDigest],
        ) -> Result<NeutralSummary, ServiceError> {
            check(articles)?;
            Ok(NeutralSummary {
                title: articles[0].title.clone(),
                summary: format!("{} articles", articles.len()),
            })
        }

        async fn summarize_bias(
            &self,
            _prompt: &str,
            articles: &[ArticleDigest],
            bias: Bias,
        ) -> Result<Vec<String>, ServiceError> {
            check(articles)?;
            Ok(vec![format!("- {bias} view")])
        }

        async fn extract_common_points(
            &self,
            _prompt: &str,
            articles: &[ArticleDigest],
        ) -> Result<Vec<String>, ServiceError> {
            check(articles)?;
            Ok(vec!["shared fact".to_string()])
        }
    }

    fn article(id: &str, bias: Bias) -> Article {
        Article {
            id: id.to_string(),
            title: format!("Story {id}"),
            body: format!("Body {id}"),
            url: None,
            category: String::new(),
            bias,
            published_at: None,
            image_url: None,
            embedding: None,
            issue_id: None,
        }
    }

    fn assign(id: &str, cluster: u32) -> ClusterAssignment {
        ClusterAssignment {
            article_id: id.to_string(),
            label: crate::models::ClusterLabel::Cluster(cluster),
        }
    }

    fn context() -> RunContext {
        let mut config = PipelineConfig::default();
        config.retry = RetryPolicy::immediate(2);
        RunContext::new(config, CancellationToken::new())
    }

    #[test]
    fn test_two_thirds_left() {
        let ratio = compute_bias_ratio(&[Bias::Left, Bias::Left, Bias::Right]).unwrap();
        assert_eq!(ratio.left_pct, 66.67);
        assert_eq!(ratio.center_pct, 0.0);
        assert_eq!(ratio.right_pct, 33.33);
        assert_eq!(ratio.dominant, Bias::Left);
    }

    #[test]
    fn test_single_label_is_whole() {
        let ratio = compute_bias_ratio(&[Bias::Center, Bias::Center]).unwrap();
        assert_eq!(ratio.center_pct, 100.0);
        assert_eq!(ratio.dominant, Bias::Center);
    }

    #[test]
    fn test_even_thirds_shortfall_goes_to_center() {
        let ratio = compute_bias_ratio(&[Bias::Left, Bias::Center, Bias::Right]).unwrap();
        assert_eq!(ratio.left_pct, 33.33);
        assert_eq!(ratio.center_pct, 33.34);
        assert_eq!(ratio.right_pct, 33.33);
        assert_eq!(ratio.dominant, Bias::Center);
    }

    #[test]
    fn test_rounding_excess_taken_from_largest() {
        let biases = [
            Bias::Left,
            Bias::Center,
            Bias::Right,
            Bias::Right,
            Bias::Right,
            Bias::Right,
        ];
        let ratio = compute_bias_ratio(&biases).unwrap();
        assert_eq!(ratio.left_pct, 16.67);
        assert_eq!(ratio.center_pct, 16.67);
        assert_eq!(ratio.right_pct, 66.66);
        assert!(verify_bias_ratio(&ratio, biases.len()).is_ok());
    }

    #[test]
    fn test_tie_break_order() {
        let left_right = compute_bias_ratio(&[Bias::Right, Bias::Left]).unwrap();
        assert_eq!(left_right.dominant, Bias::Left);

        let center_left = compute_bias_ratio(&[Bias::Left, Bias::Center]).unwrap();
        assert_eq!(center_left.dominant, Bias::Center);

        let center_right = compute_bias_ratio(&[Bias::Right, Bias::Center]).unwrap();
        assert_eq!(center_right.dominant, Bias::Center);
    }

    #[test]
    fn test_empty_has_no_ratio() {
        assert!(compute_bias_ratio(&[]).is_none());
    }

    #[test]
    fn test_verify_rejects_bad_sum() {
        let ratio = BiasRatio {
            left_pct: 50.0,
            center_pct: 30.0,
            right_pct: 30.0,
            dominant: Bias::Left,
        };
        assert!(verify_bias_ratio(&ratio, 3).unwrap_err().contains("110.00"));
    }

    #[test]
    fn test_members_ordered_newest_first() {
        let mut articles = vec![article("b", Bias::Left), article("a", Bias::Left), article("c", Bias::Left)];
        articles[1].published_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        articles[2].published_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        order_members(&mut articles);
        let ids: Vec<&str> = articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_sampling_bounded_and_interleaved() {
        let articles = vec![
            article("l1", Bias::Left),
            article("l2", Bias::Left),
            article("l3", Bias::Left),
            article("r1", Bias::Right),
            article("c1", Bias::Center),
        ];
        let samples = sample_by_bias(&articles, 2);
        assert_eq!(samples[&Bias::Left].len(), 2);

        let mixed: Vec<&str> = sample_across_biases(&samples)
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(mixed, vec!["c1", "l1", "r1", "l2"]);
    }

    #[tokio::test]
    async fn test_creates_complete_issue() {
        let store = MemoryStore::with_articles([article("a", Bias::Left), article("b", Bias::Right)]);
        let result = execute_stage2(&context(), &store, &EchoSummarizer, &[assign("a", 0), assign("b", 0)])
            .await;

        assert_eq!(result.created, 1);
        assert!(result.failures.is_empty());
        let issue_id = result.mapping.links[0].issue_id;
        let issue = store.issue(issue_id).await.unwrap();
        assert_eq!(issue.summary_status, SummaryStatus::Complete);
        assert_eq!(issue.bias_left_pct, 50.0);
        assert_eq!(issue.dominant_bias, Bias::Left);
        let summaries = store.bias_summaries(issue_id).await;
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].bias, Bias::Left);
        assert_eq!(summaries[0].bullets, vec!["left view".to_string()]);
        assert_eq!(store.common_points(issue_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_summaries_still_persist_ratios() {
        let mut failing = article("b", Bias::Right);
        failing.title = "FAIL story".to_string();
        let store = MemoryStore::with_articles([article("a", Bias::Left), failing]);
        let result = execute_stage2(&context(), &store, &EchoSummarizer, &[assign("a", 3), assign("b", 3)])
            .await;

        assert_eq!(result.created, 1);
        assert_eq!(result.degraded, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].item, FailedItem::Cluster(3));
        assert_eq!(result.failures[0].kind, FailureKind::DegradedSummary);

        let issue = store.issue(result.mapping.links[0].issue_id).await.unwrap();
        assert!(issue.is_degraded());
        assert!(issue.title.is_none());
        assert_eq!(issue.bias_right_pct, 50.0);
    }

    #[tokio::test]
    async fn test_existing_issue_is_reused() {
        let store = MemoryStore::with_articles([article("a", Bias::Center), article("b", Bias::Center)]);
        let assignments = [assign("a", 0), assign("b", 0)];
        let first = execute_stage2(&context(), &store, &EchoSummarizer, &assignments).await;
        let second = execute_stage2(&context(), &store, &EchoSummarizer, &assignments).await;

        assert_eq!(second.created, 0);
        assert_eq!(second.reused, 1);
        assert_eq!(first.mapping.links[0].issue_id, second.mapping.links[0].issue_id);
        assert_eq!(store.issues().await.len(), 1);
    }

    #[tokio::test]
    async fn test_member_of_other_issue_halts_cluster() {
        let store = MemoryStore::with_articles([
            article("a", Bias::Left),
            article("b", Bias::Left),
            article("c", Bias::Right),
        ]);
        let other = execute_stage2(&context(), &store, &EchoSummarizer, &[assign("a", 0), assign("c", 0)])
            .await;
        store
            .set_article_issue("a", other.mapping.links[0].issue_id)
            .await
            .unwrap();

        let result = execute_stage2(&context(), &store, &EchoSummarizer, &[assign("a", 1), assign("b", 1)])
            .await;
        assert_eq!(result.halted, 1);
        assert!(result.mapping.is_empty());
        assert_eq!(result.failures[0].kind, FailureKind::ConsistencyViolation);
    }

    #[tokio::test]
    async fn test_small_clusters_and_noise_skipped() {
        let store = MemoryStore::with_articles([article("a", Bias::Left)]);
        let assignments = [
            assign("a", 0),
            ClusterAssignment {
                article_id: "z".into(),
                label: crate::models::ClusterLabel::Noise,
            },
        ];
        let result = execute_stage2(&context(), &store, &EchoSummarizer, &assignments).await;
        assert_eq!(result.too_small, 1);
        assert!(store.issues().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing() {
        let store = MemoryStore::with_articles([article("a", Bias::Left), article("b", Bias::Left)]);
        let ctx = context();
        ctx.cancel.cancel();
        let result = execute_stage2(&ctx, &store, &EchoSummarizer, &[assign("a", 0), assign("b", 0)])
            .await;
        assert_eq!(result.cancelled, 1);
        assert!(store.issues().await.is_empty());
    }

    proptest! {
        #[test]
        fn prop_percentages_always_sum_to_100(labels in proptest::collection::vec(0u8..3, 1..60)) {
            let biases: Vec<Bias> = labels.iter().map(|l| Bias::ALL[*l as usize]).collect();
            let ratio = compute_bias_ratio(&biases).unwrap();
            prop_assert!((ratio.sum() - 100.0).abs() < 1e-9);
            prop_assert!(verify_bias_ratio(&ratio, biases.len()).is_ok());

            let dominant_count = biases.iter().filter(|b| **b == ratio.dominant).count();
            for bias in Bias::ALL {
                prop_assert!(biases.iter().filter(|b| **b == bias).count() <= dominant_count);
            }
        }
    }
}
