pub mod clustering;
pub mod config;
pub mod error;
pub mod io;
pub mod llm;
pub mod lock;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod stages;
pub mod store;

pub use clustering::{grid_search, k_distances, Dbscan, TuningResult};
pub use config::{ClusterConfig, EmbedConfig, IssueConfig, LinkConfig, PipelineConfig};
pub use error::{FailureLedger, FailureRecord, PipelineError, ServiceError, StoreError};
pub use io::{load_articles, RunArtifacts};
pub use llm::{
    AnthropicClient, AnthropicConfig, Embedder, OpenAiConfig, OpenAiEmbedder, Summarizer,
};
pub use models::{Article, Bias, ClusterAssignment, ClusterLabel, Issue};
pub use orchestrator::{Orchestrator, RunReport, RunSummary, Step};
pub use retry::RetryPolicy;
pub use stages::{compute_bias_ratio, BiasRatio, RunContext};
pub use store::{ArticleStore, JsonFileStore, LinkOutcome, MemoryStore};
