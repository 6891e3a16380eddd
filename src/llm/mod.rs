pub mod client;
pub mod embeddings;
pub mod prompts;
pub mod validation;

pub use client::*;
pub use embeddings::*;
pub use prompts::*;
pub use validation::*;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ServiceError;
use crate::models::{Article, ArticleId, Bias, NeutralSummary};

/// Turns text into fixed-length vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed every input, returning vectors in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ServiceError::InvalidResponse("no embedding returned".to_string()))
    }
}

/// Produces neutral and per-bias summaries of a set of articles
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Neutral headline and summary across all sampled coverage
    async fn summarize(
        &self,
        prompt: &str,
        articles: &[ArticleDigest],
    ) -> Result<NeutralSummary, ServiceError>;

    /// Bullet points describing how one side covers the story
    async fn summarize_bias(
        &self,
        prompt: &str,
        articles: &[ArticleDigest],
        bias: Bias,
    ) -> Result<Vec<String>, ServiceError>;

    /// Facts reported the same way across opposing coverage
    async fn extract_common_points(
        &self,
        prompt: &str,
        articles: &[ArticleDigest],
    ) -> Result<Vec<String>, ServiceError>;
}

/// The slice of an article that is sent to the summarization service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleDigest {
    pub id: ArticleId,
    pub title: String,
    pub excerpt: String,
    pub bias: Bias,
}

impl ArticleDigest {
    pub fn from_article(article: &Article, excerpt_chars: usize) -> Self {
        let body = article.body.trim();
        let excerpt = if body.chars().count() > excerpt_chars {
            let mut cut: String = body.chars().take(excerpt_chars).collect();
            cut.push_str("...");
            cut
        } else {
            body.to_string()
        };
        Self {
            id: article.id.clone(),
            title: article.title.trim().to_string(),
            excerpt,
            bias: article.bias,
        }
    }
}
