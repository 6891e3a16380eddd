use crate::error::PipelineError;
use crate::llm::ValidationConfig;
use crate::retry::RetryPolicy;

/// Configuration for the embedding stage
#[derive(Debug, Clone)]
pub struct EmbedConfig {
    /// Embedding model name passed to the service
    pub model: String,
    /// Maximum characters of title + body sent per article
    pub max_input_chars: usize,
    /// Articles per embedding request
    pub batch_size: usize,
    /// Embedding requests in flight at once
    pub concurrency: usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            // roughly 1500 tokens
            max_input_chars: 6000,
            batch_size: 16,
            concurrency: 4,
        }
    }
}

/// Configuration for the clustering stage
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    /// Cosine distance radius; points farther apart are not neighbors
    pub eps: f64,
    /// Neighbors (self included) needed for a point to seed a cluster
    pub min_samples: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            eps: 0.15,
            min_samples: 2,
        }
    }
}

/// Configuration for the issue generation stage
#[derive(Debug, Clone)]
pub struct IssueConfig {
    /// Summarization model name passed to the service
    pub model: String,
    /// Representative articles sampled per bias label
    pub max_samples_per_bias: usize,
    /// Characters of body text included per sampled article
    pub excerpt_chars: usize,
    /// Clusters summarized concurrently
    pub concurrency: usize,
    /// Limits applied to summarization output
    pub validation: ValidationConfig,
}

impl Default for IssueConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_samples_per_bias: 5,
            excerpt_chars: 500,
            concurrency: 4,
            validation: ValidationConfig::default(),
        }
    }
}

/// Configuration for the linkage stage
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Finish an interrupted run's mapping before fetching new articles
    pub resume_pending: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            resume_pending: true,
        }
    }
}

/// Configuration threaded through every stage of one run
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub embed: EmbedConfig,
    pub cluster: ClusterConfig,
    pub issues: IssueConfig,
    pub link: LinkConfig,
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    /// Reject settings no stage can run with
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut errors = Vec::new();

        if !(self.cluster.eps > 0.0 && self.cluster.eps <= 2.0) {
            errors.push(format!(
                "eps must be a cosine distance in (0, 2], got {}",
                self.cluster.eps
            ));
        }
        if self.cluster.min_samples == 0 {
            errors.push("min_samples must be at least 1".to_string());
        }
        if self.embed.max_input_chars == 0 {
            errors.push("max_input_chars must be positive".to_string());
        }
        if self.embed.batch_size == 0 {
            errors.push("embedding batch size must be positive".to_string());
        }
        if self.embed.concurrency == 0 || self.issues.concurrency == 0 {
            errors.push("worker pool sizes must be positive".to_string());
        }
        if self.issues.max_samples_per_bias == 0 {
            errors.push("max_samples_per_bias must be positive".to_string());
        }
        if self.issues.validation.max_title_chars == 0 {
            errors.push("max_title_chars must be positive".to_string());
        }
        if self.retry.max_attempts == 0 {
            errors.push("max retry attempts must be at least 1".to_string());
        }
        if self.retry.base_delay > self.retry.max_delay {
            errors.push("retry base delay exceeds max delay".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Config(errors.join("; ")))
        }
    }
}
