use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use issue_pipeline::clustering::{DEFAULT_EPS_GRID, DEFAULT_MIN_SAMPLES_GRID};
use issue_pipeline::{
    grid_search, k_distances, load_articles, AnthropicClient, AnthropicConfig, JsonFileStore,
    OpenAiConfig, OpenAiEmbedder, Orchestrator, PipelineConfig, RetryPolicy, RunArtifacts, Step,
};

#[derive(Parser)]
#[command(name = "issue-pipeline")]
#[command(author, version, about = "Groups news coverage into issues with a bias breakdown", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed, cluster, summarize and link the currently unclustered articles
    Run {
        #[command(flatten)]
        paths: PathArgs,

        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Run only this stage against the artifacts of earlier steps
        #[arg(long, value_enum)]
        step: Option<Step>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Add articles from a JSON array or JSON-lines file to the store
    Import {
        /// Article export to read
        #[arg(short, long)]
        input: PathBuf,

        /// Store snapshot file
        #[arg(long, env = "ISSUE_PIPELINE_STORE", default_value = "store.json")]
        store: PathBuf,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Grid-search eps and min_samples over the embedding artifact
    Tune {
        /// Directory holding run artifacts
        #[arg(long, env = "ISSUE_PIPELINE_ARTIFACTS", default_value = "artifacts")]
        artifacts: PathBuf,

        /// Radii to try (comma separated)
        #[arg(long, value_delimiter = ',')]
        eps: Vec<f64>,

        /// Neighborhood sizes to try (comma separated)
        #[arg(long, value_delimiter = ',')]
        min_samples: Vec<usize>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the k-distance profile of the embedding artifact
    KDistance {
        /// Directory holding run artifacts
        #[arg(long, env = "ISSUE_PIPELINE_ARTIFACTS", default_value = "artifacts")]
        artifacts: PathBuf,

        /// Neighbor rank, the point itself counting as the first
        #[arg(short, long, default_value = "2")]
        k: usize,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Args)]
struct PathArgs {
    /// Store snapshot file
    #[arg(long, env = "ISSUE_PIPELINE_STORE", default_value = "store.json")]
    store: PathBuf,

    /// Directory for run artifacts and the run lock
    #[arg(long, env = "ISSUE_PIPELINE_ARTIFACTS", default_value = "artifacts")]
    artifacts: PathBuf,
}

#[derive(Args)]
struct PipelineArgs {
    /// Cosine distance radius for clustering
    #[arg(long, env = "ISSUE_PIPELINE_EPS", default_value = "0.15")]
    eps: f64,

    /// Neighbors (self included) needed to seed a cluster
    #[arg(long, env = "ISSUE_PIPELINE_MIN_SAMPLES", default_value = "2")]
    min_samples: usize,

    /// Representative articles sampled per bias label
    #[arg(long, env = "ISSUE_PIPELINE_SAMPLES_PER_BIAS", default_value = "5")]
    samples_per_bias: usize,

    /// Attempts per service call, including the first
    #[arg(long, env = "ISSUE_PIPELINE_MAX_ATTEMPTS", default_value = "3")]
    max_attempts: u32,

    /// Delay before the first retry in milliseconds
    #[arg(long, env = "ISSUE_PIPELINE_BACKOFF_MS", default_value = "500")]
    backoff_ms: u64,

    /// Longest delay between retries in milliseconds
    #[arg(long, env = "ISSUE_PIPELINE_MAX_BACKOFF_MS", default_value = "8000")]
    max_backoff_ms: u64,

    /// Summarization model
    #[arg(long, env = "ISSUE_PIPELINE_MODEL", default_value = "claude-sonnet-4-20250514")]
    model: String,

    /// Embedding model
    #[arg(long, env = "ISSUE_PIPELINE_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Maximum characters of title and body sent for embedding
    #[arg(long, default_value = "6000")]
    max_input_chars: usize,

    /// Articles per embedding request
    #[arg(long, default_value = "16")]
    batch_size: usize,

    /// Embedding requests in flight at once
    #[arg(long, default_value = "4")]
    embed_concurrency: usize,

    /// Clusters summarized at once
    #[arg(long, default_value = "4")]
    issue_concurrency: usize,

    /// Do not finish an interrupted run's links before starting
    #[arg(long)]
    no_resume: bool,
}

impl PipelineArgs {
    fn to_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.cluster.eps = self.eps;
        config.cluster.min_samples = self.min_samples;
        config.embed.model = self.embedding_model.clone();
        config.embed.max_input_chars = self.max_input_chars;
        config.embed.batch_size = self.batch_size;
        config.embed.concurrency = self.embed_concurrency;
        config.issues.model = self.model.clone();
        config.issues.max_samples_per_bias = self.samples_per_bias;
        config.issues.concurrency = self.issue_concurrency;
        config.link.resume_pending = !self.no_resume;
        config.retry = RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
        };
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            paths,
            pipeline,
            step,
            verbose,
        } => {
            setup_logging(verbose);
            run_pipeline(paths, pipeline.to_config(), step).await
        }
        Commands::Import {
            input,
            store,
            verbose,
        } => {
            setup_logging(verbose);
            import_articles(input, store).await
        }
        Commands::Tune {
            artifacts,
            eps,
            min_samples,
            verbose,
        } => {
            setup_logging(verbose);
            tune(artifacts, eps, min_samples)
        }
        Commands::KDistance {
            artifacts,
            k,
            verbose,
        } => {
            setup_logging(verbose);
            k_distance(artifacts, k)
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

async fn run_pipeline(paths: PathArgs, config: PipelineConfig, step: Option<Step>) -> Result<()> {
    config.validate()?;

    let store = JsonFileStore::open(&paths.store)
        .await
        .with_context(|| format!("Failed to open store: {:?}", paths.store))?;
    let artifacts = RunArtifacts::new(&paths.artifacts)?;

    let embedder = OpenAiEmbedder::new(OpenAiConfig::from_env(&config.embed.model)?)?;
    let summarizer = AnthropicClient::new(AnthropicConfig::from_env(&config.issues.model)?);
    info!(
        "Using embedding model {} and summarization model {}",
        config.embed.model,
        summarizer.model()
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work");
            on_signal.cancel();
        }
    });

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(store),
        Arc::new(embedder),
        Arc::new(summarizer),
        artifacts,
    );

    let report = match step {
        Some(step) => orchestrator.run_step(step, cancel).await?,
        None => orchestrator.run(cancel).await?,
    };

    if !report.ledger.is_empty() {
        warn!(
            "{} failures recorded in {:?}",
            report.ledger.len(),
            orchestrator.artifacts().path(issue_pipeline::io::FAILURES_FILE)
        );
    }

    Ok(())
}

async fn import_articles(input: PathBuf, store: PathBuf) -> Result<()> {
    info!("Loading articles from {:?}", input);
    let articles = load_articles(&input)?;
    let total = articles.len();

    let store = JsonFileStore::open(&store)
        .await
        .with_context(|| format!("Failed to open store: {:?}", store))?;
    let added = store.import_articles(articles).await?;

    info!("Imported {} of {} articles into {:?}", added, total, store.path());
    Ok(())
}

fn tune(artifacts: PathBuf, eps: Vec<f64>, min_samples: Vec<usize>) -> Result<()> {
    let artifacts = RunArtifacts::new(&artifacts)?;
    let vectors: Vec<Vec<f32>> = artifacts
        .load_embeddings()?
        .into_iter()
        .map(|r| r.vector)
        .collect();
    anyhow::ensure!(!vectors.is_empty(), "no embeddings in {:?}", artifacts.dir());

    let eps = if eps.is_empty() { DEFAULT_EPS_GRID.to_vec() } else { eps };
    let min_samples = if min_samples.is_empty() {
        DEFAULT_MIN_SAMPLES_GRID.to_vec()
    } else {
        min_samples
    };

    info!(
        "Searching {} parameter pairs over {} vectors",
        eps.len() * min_samples.len(),
        vectors.len()
    );

    match grid_search(&vectors, &eps, &min_samples) {
        Some(best) => {
            println!("=== Best Parameters ===");
            println!("eps:         {}", best.eps);
            println!("min_samples: {}", best.min_samples);
            println!("clusters:    {}", best.clusters);
            println!("noise:       {}", best.noise);
            println!("silhouette:  {:.4}", best.silhouette);
        }
        None => println!("No parameter pair produced at least two scorable clusters"),
    }

    Ok(())
}

fn k_distance(artifacts: PathBuf, k: usize) -> Result<()> {
    let artifacts = RunArtifacts::new(&artifacts)?;
    let vectors: Vec<Vec<f32>> = artifacts
        .load_embeddings()?
        .into_iter()
        .map(|r| r.vector)
        .collect();

    let distances = k_distances(&vectors, k);
    anyhow::ensure!(
        !distances.is_empty(),
        "need at least {} embeddings for k={}",
        k.max(1),
        k
    );

    println!("=== {}-distance profile ({} points) ===", k, distances.len());
    for pct in (0..=100).step_by(10) {
        let index = (distances.len() - 1) * pct / 100;
        println!("{:>3}%  {:.4}", pct, distances[index]);
    }

    Ok(())
}
