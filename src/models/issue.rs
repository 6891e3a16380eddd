use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ArticleId, Bias};

/// Namespace for issue idempotency keys
const ISSUE_KEY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_8d3b_4c55_9a07_e2b1_54c3_d9f0);

/// Whether an issue received every summary it asked for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    #[default]
    Complete,
    /// One or more summarization calls failed; bias ratios are still valid
    Degraded,
}

/// A synthesized news event aggregating coverage from several outlets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    /// Derived from the member article set; identical sets map to one issue
    pub idempotency_key: Uuid,
    /// Neutral headline; absent when the summarization call failed
    pub title: Option<String>,
    /// Neutral summary; absent when the summarization call failed
    pub summary: Option<String>,
    pub summary_status: SummaryStatus,
    pub image_url: Option<String>,
    pub bias_left_pct: f64,
    pub bias_center_pct: f64,
    pub bias_right_pct: f64,
    pub dominant_bias: Bias,
    /// Number of articles linked to this issue
    pub source_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    pub fn pct_sum(&self) -> f64 {
        self.bias_left_pct + self.bias_center_pct + self.bias_right_pct
    }

    pub fn is_degraded(&self) -> bool {
        self.summary_status == SummaryStatus::Degraded
    }
}

/// Bullet-point summary of one side's coverage of an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasSummary {
    pub issue_id: Uuid,
    pub bias: Bias,
    pub bullets: Vec<String>,
}

/// A fact reported consistently across opposing coverage of an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonPoint {
    pub issue_id: Uuid,
    pub text: String,
}

/// Neutral headline and summary returned by the summarization service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeutralSummary {
    pub title: String,
    pub summary: String,
}

/// Idempotency key for an issue built from the given member articles.
///
/// The key does not depend on the order of `article_ids`.
pub fn issue_key(article_ids: &[ArticleId]) -> Uuid {
    let mut sorted: Vec<&str> = article_ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    Uuid::new_v5(&ISSUE_KEY_NAMESPACE, sorted.join("\n").as_bytes())
}
