//! CLI command definitions for self-debug.
//!
//! `solve` runs the self-correction batch, `report` summarizes a finished
//! run, and `stack-overflow` prepares the retrieval corpus used by the
//! chain-of-thought strategy.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::collectors::stack_overflow::{
    load_or_build_index, StackOverflowExtractor, StackOverflowPaths,
};
use crate::correction::{
    CodeGenerator, GeneratorConfig, LoopConfig, SelfCorrectionLoop, Strategy,
};
use crate::dataset::Dataset;
use crate::execution::PythonTester;
use crate::llm::litellm::DEFAULT_LITELLM_MODEL;
use crate::llm::providers::LlmProvider;
use crate::llm::{EmbeddingProvider, LiteLlmClient, OpenAiEmbeddingClient, OpenRouterProvider};
use crate::pipeline::config::parse_libraries;
use crate::pipeline::{BatchRunner, PipelineConfig, Throttle};
use crate::retrieval::{
    load_rendered, RenderConfig, Retriever, ThreadRenderer, VectorRetriever, VectorStore,
    DEFAULT_CHUNK_SIZE,
};
use crate::storage::{accuracy_by_library, CheckpointStore, FsCheckpointStore};
use crate::validation::PythonSyntaxValidator;

/// Default directory for Stack Overflow extraction and rendering.
const DEFAULT_SO_DIR: &str = "data/stack_overflow";

/// Default vector store location.
const DEFAULT_RETRIEVAL_DB: &str = "data/stack_overflow.db";

/// Bounded self-correction harness for DS-1000.
#[derive(Parser)]
#[command(name = "self-debug")]
#[command(about = "Generate, test and iteratively repair DS-1000 solutions with an LLM")]
#[command(version)]
#[command(
    long_about = "self-debug generates a candidate solution for each DS-1000 problem, runs it against the problem's test harness, and feeds failures back to the model for a bounded number of corrections.\n\nExample usage:\n  self-debug solve --libraries Pandas,Numpy --budget 5 --run-name v1\n  self-debug report --run-name v1"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the self-correction loop over the dataset.
    Solve(Box<SolveArgs>),

    /// Print per-library accuracy of a run.
    Report(ReportArgs),

    /// Build the Stack Overflow retrieval corpus.
    #[command(name = "stack-overflow", alias = "so")]
    StackOverflow(StackOverflowArgs),
}

/// Arguments for `self-debug solve`.
///
/// Unset options fall back to `SELF_DEBUG_*` environment variables, then to
/// built-in defaults.
#[derive(Parser, Debug)]
pub struct SolveArgs {
    /// DS-1000 JSON-lines file.
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// Comma-separated libraries to run (e.g. Pandas,Numpy).
    #[arg(long)]
    pub libraries: Option<String>,

    /// Maximum problems per library.
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Corrections allowed after the initial attempt.
    #[arg(short, long)]
    pub budget: Option<u32>,

    /// Model identifier.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Sampling temperature.
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Retries on transient generation failures.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Log full prompts and responses.
    #[arg(short, long)]
    pub verbose: bool,

    /// Seconds to wait after each processed problem (0 disables).
    #[arg(long)]
    pub throttle_secs: Option<u64>,

    /// Python interpreter used to run candidates.
    #[arg(long)]
    pub python: Option<String>,

    /// Per-test timeout in seconds.
    #[arg(long)]
    pub test_timeout_secs: Option<u64>,

    /// Output root directory.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Run name; artifacts land in `{output}/{run_name}`.
    #[arg(short, long)]
    pub run_name: Option<String>,

    /// Strategy of the first attempt (zero-shot or chain-of-thought).
    #[arg(long)]
    pub initial_strategy: Option<Strategy>,

    /// Strategy of correction attempts.
    #[arg(long)]
    pub correction_strategy: Option<Strategy>,

    /// Vector store of rendered Stack Overflow threads.
    #[arg(long)]
    pub retrieval_db: Option<PathBuf>,

    /// Threads retrieved per problem.
    #[arg(short = 'k', long)]
    pub retrieval_k: Option<usize>,

    /// OpenRouter API key (can also be set via OPENROUTER_API_KEY env var).
    #[arg(long, env = "OPENROUTER_API_KEY")]
    pub api_key: Option<String>,

    /// LiteLLM base URL, used when no OpenRouter key is given.
    #[arg(long, env = "LITELLM_API_BASE")]
    pub api_base: Option<String>,

    #[command(flatten)]
    pub embeddings: EmbeddingArgs,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Embedding endpoint options shared by retrieval commands.
#[derive(clap::Args, Debug, Clone)]
pub struct EmbeddingArgs {
    /// Embeddings API key (can also be set via EMBEDDINGS_API_KEY env var).
    #[arg(long, env = "EMBEDDINGS_API_KEY")]
    pub embeddings_api_key: Option<String>,

    /// OpenAI-compatible embeddings base URL.
    #[arg(long)]
    pub embeddings_url: Option<String>,

    /// Embedding model.
    #[arg(long)]
    pub embedding_model: Option<String>,
}

/// Arguments for `self-debug report`.
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Output root directory.
    #[arg(short, long, default_value = "output")]
    pub output: PathBuf,

    /// Run name to summarize.
    #[arg(short, long, default_value = "default")]
    pub run_name: String,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Stack Overflow entrypoint arguments.
#[derive(Parser, Debug)]
pub struct StackOverflowArgs {
    #[command(subcommand)]
    pub command: StackOverflowSubcommand,
}

/// Stack Overflow corpus subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum StackOverflowSubcommand {
    /// Stream posts and comments out of a Stack Exchange dump.
    Extract(ExtractArgs),

    /// Render extracted threads into token-bounded documents.
    Render(RenderArgs),

    /// Embed rendered documents into the vector store.
    Ingest(IngestArgs),

    /// Print the documents closest to a query.
    Query(QueryArgs),
}

/// Arguments for `self-debug stack-overflow extract`.
#[derive(Parser, Debug)]
pub struct ExtractArgs {
    /// Path to Posts.xml.
    #[arg(long)]
    pub posts: PathBuf,

    /// Path to Comments.xml.
    #[arg(long)]
    pub comments: PathBuf,

    /// Directory for extracted rows and metadata.
    #[arg(short, long, default_value = DEFAULT_SO_DIR)]
    pub data_dir: PathBuf,

    /// Comma-separated tags to keep (defaults to the DS-1000 libraries).
    #[arg(long)]
    pub tags: Option<String>,
}

/// Arguments for `self-debug stack-overflow render`.
#[derive(Parser, Debug)]
pub struct RenderArgs {
    /// Directory holding extracted rows.
    #[arg(short, long, default_value = DEFAULT_SO_DIR)]
    pub data_dir: PathBuf,

    /// Threads with fewer comments are skipped.
    #[arg(long, default_value = "10")]
    pub min_comments: usize,

    /// Token ceiling per document.
    #[arg(long, default_value = "3000")]
    pub max_tokens: usize,

    /// Comments between window starts.
    #[arg(long, default_value = "5")]
    pub step: usize,
}

/// Arguments for `self-debug stack-overflow ingest`.
#[derive(Parser, Debug)]
pub struct IngestArgs {
    /// Directory holding rendered documents.
    #[arg(short, long, default_value = DEFAULT_SO_DIR)]
    pub data_dir: PathBuf,

    /// Vector store path.
    #[arg(long, default_value = DEFAULT_RETRIEVAL_DB)]
    pub db: PathBuf,

    /// Documents per embedding request.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    #[command(flatten)]
    pub embeddings: EmbeddingArgs,
}

/// Arguments for `self-debug stack-overflow query`.
#[derive(Parser, Debug)]
pub struct QueryArgs {
    /// Query text.
    pub query: String,

    /// Vector store path.
    #[arg(long, default_value = DEFAULT_RETRIEVAL_DB)]
    pub db: PathBuf,

    /// Number of documents to return.
    #[arg(short, long, default_value = "3")]
    pub k: usize,

    #[command(flatten)]
    pub embeddings: EmbeddingArgs,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Solve(args) => run_solve_command(*args).await,
        Commands::Report(args) => run_report_command(args).await,
        Commands::StackOverflow(args) => run_stack_overflow_command(args).await,
    }
}

// ============================================================================
// Solve / Report
// ============================================================================

/// Resolve the run configuration: CLI flags over environment over defaults.
fn solve_config(args: &SolveArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env()?;

    if let Some(path) = &args.dataset {
        config.dataset_path = path.clone();
    }
    if let Some(libraries) = &args.libraries {
        config.libraries = parse_libraries(libraries, "--libraries")?;
    }
    if let Some(limit) = args.limit {
        config.limit = Some(limit);
    }
    if let Some(budget) = args.budget {
        config.budget = budget;
    }
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(temperature) = args.temperature {
        config.temperature = temperature;
    }
    if let Some(retries) = args.max_retries {
        config.max_retries = retries;
    }
    config.verbose |= args.verbose;
    if let Some(secs) = args.throttle_secs {
        config.throttle = Duration::from_secs(secs);
    }
    if let Some(python) = &args.python {
        config.python = python.clone();
    }
    if let Some(secs) = args.test_timeout_secs {
        config.test_timeout = Duration::from_secs(secs);
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if let Some(run_name) = &args.run_name {
        config.run_name = run_name.clone();
    }
    if let Some(strategy) = args.initial_strategy {
        config.initial_strategy = Some(strategy);
    }
    if let Some(strategy) = args.correction_strategy {
        config.correction_strategy = strategy;
    }
    if let Some(db) = &args.retrieval_db {
        config.retrieval_db = Some(db.clone());
    }
    if let Some(k) = args.retrieval_k {
        config.retrieval_k = k;
    }

    config.validate()?;
    Ok(config)
}

async fn run_solve_command(args: SolveArgs) -> anyhow::Result<()> {
    let config = solve_config(&args)?;
    let dataset = Dataset::load(&config.dataset_path)?;
    let llm = build_llm_client(args.api_key.clone(), args.api_base.clone(), &config)?;

    let generator_config = GeneratorConfig {
        model: config.model.clone(),
        temperature: config.temperature,
        max_tokens: None,
        retrieval_k: config.retrieval_k,
        verbose: config.verbose,
    };
    let validator = PythonSyntaxValidator::new(config.python.clone());
    let mut generator = CodeGenerator::new(llm, generator_config).with_validator(Arc::new(validator));
    if let Some(db) = &config.retrieval_db {
        let store = VectorStore::open(&db.to_string_lossy()).await?;
        info!(db = %db.display(), documents = store.count().await?, "Retrieval enabled");
        let retriever: Arc<dyn Retriever> =
            Arc::new(VectorRetriever::new(store, build_embedder(&args.embeddings)));
        generator = generator.with_retriever(retriever);
    }

    let tester = PythonTester::new(config.python.clone(), config.test_timeout);
    let loop_config = LoopConfig {
        budget: config.budget,
        initial_strategy: config.resolved_initial_strategy(),
        correction_strategy: config.correction_strategy,
    };
    info!(
        run = %config.run_name,
        budget = loop_config.budget,
        initial = %loop_config.initial_strategy,
        correction = %loop_config.correction_strategy,
        "Starting self-correction run"
    );
    let correction = SelfCorrectionLoop::new(Arc::new(generator), Arc::new(tester), loop_config);
    let store = FsCheckpointStore::new(&config.output_dir, &config.run_name);

    let runner = BatchRunner::new(Arc::new(correction), Arc::new(store))
        .with_libraries(config.libraries.clone())
        .with_limit(config.limit)
        .with_throttle(Throttle::new(config.throttle));
    let start = std::time::Instant::now();
    let summary = runner.run(&dataset).await?;

    if args.json {
        let output = serde_json::json!({
            "run": config.run_name,
            "summary": summary,
            "duration_secs": start.elapsed().as_secs_f64(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "Processed {} problems ({} skipped, {} correct) in {:.1}s",
            summary.processed,
            summary.skipped,
            summary.correct,
            start.elapsed().as_secs_f64()
        );
        for row in &summary.accuracy {
            println!("{}", row);
        }
    }
    Ok(())
}

async fn run_report_command(args: ReportArgs) -> anyhow::Result<()> {
    let store = FsCheckpointStore::new(&args.output, &args.run_name);
    let verdicts = store.verdicts().await?;
    if verdicts.is_empty() {
        anyhow::bail!("No verdicts found under {}", store.run_dir().display());
    }

    let rows = accuracy_by_library(&verdicts);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in &rows {
            println!("{}", row);
        }
    }
    Ok(())
}

fn build_llm_client(
    api_key: Option<String>,
    api_base: Option<String>,
    config: &PipelineConfig,
) -> anyhow::Result<Arc<dyn LlmProvider>> {
    if let Some(key) = api_key {
        let provider = if config.model.is_empty() {
            OpenRouterProvider::new(key)
        } else {
            OpenRouterProvider::with_model(key, config.model.clone())
        };
        info!(model = %provider.default_model(), "Using OpenRouter with specified API key");
        return Ok(Arc::new(provider.with_max_retries(config.max_retries)));
    }

    let Some(base) = api_base else {
        anyhow::bail!(
            "No LLM client configured. Please provide --api-key or --api-base, or set \
             OPENROUTER_API_KEY/LITELLM_API_BASE env var."
        );
    };
    let model = if config.model.is_empty() {
        std::env::var("LITELLM_DEFAULT_MODEL")
            .unwrap_or_else(|_| DEFAULT_LITELLM_MODEL.to_string())
    } else {
        config.model.clone()
    };
    info!(api_base = %base, model = %model, "Using LiteLLM client");
    let client = LiteLlmClient::new(base, std::env::var("LITELLM_API_KEY").ok(), model)
        .with_max_retries(config.max_retries);
    Ok(Arc::new(client))
}

fn build_embedder(args: &EmbeddingArgs) -> Arc<dyn EmbeddingProvider> {
    let mut client = OpenAiEmbeddingClient::new(args.embeddings_api_key.clone());
    if let Some(url) = &args.embeddings_url {
        client = client.with_base_url(url);
    }
    if let Some(model) = &args.embedding_model {
        client = client.with_model(model.clone());
    }
    Arc::new(client)
}

// ============================================================================
// Stack Overflow
// ============================================================================

async fn run_stack_overflow_command(args: StackOverflowArgs) -> anyhow::Result<()> {
    match args.command {
        StackOverflowSubcommand::Extract(args) => run_extract_command(args).await,
        StackOverflowSubcommand::Render(args) => run_render_command(args).await,
        StackOverflowSubcommand::Ingest(args) => run_ingest_command(args).await,
        StackOverflowSubcommand::Query(args) => run_query_command(args).await,
    }
}

async fn run_extract_command(args: ExtractArgs) -> anyhow::Result<()> {
    let mut extractor = StackOverflowExtractor::new(StackOverflowPaths::new(&args.data_dir));
    if let Some(tags) = &args.tags {
        extractor = extractor.with_tags(
            tags.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        );
    }

    let (posts, comments) =
        tokio::task::spawn_blocking(move || extractor.extract(&args.posts, &args.comments))
            .await??;
    println!(
        "Posts: {} kept, {} written, {} skipped",
        posts.kept, posts.written, posts.skipped
    );
    println!(
        "Comments: {} kept, {} written, {} skipped",
        comments.kept, comments.written, comments.skipped
    );
    Ok(())
}

async fn run_render_command(args: RenderArgs) -> anyhow::Result<()> {
    let paths = StackOverflowPaths::new(&args.data_dir);
    let config = RenderConfig {
        min_comments: args.min_comments,
        max_tokens: args.max_tokens,
        step: args.step.max(1),
    };

    let stats = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let index = load_or_build_index(&paths)?;
        let renderer = ThreadRenderer::new(paths, config)?;
        Ok(renderer.render_all(&index)?)
    })
    .await??;
    println!(
        "Rendered {} of {} threads into {} documents",
        stats.rendered_threads, stats.threads, stats.documents
    );
    Ok(())
}

async fn run_ingest_command(args: IngestArgs) -> anyhow::Result<()> {
    let paths = StackOverflowPaths::new(&args.data_dir);
    let documents = load_rendered(&paths.rendered_dir())?;
    if documents.is_empty() {
        anyhow::bail!(
            "No rendered documents in {}; run `stack-overflow render` first",
            paths.rendered_dir().display()
        );
    }

    let store = VectorStore::open(&args.db.to_string_lossy()).await?;
    let embedder = build_embedder(&args.embeddings);
    let stats = store
        .ingest(documents, embedder.as_ref(), args.chunk_size)
        .await?;
    println!(
        "Submitted {}, ingested {}, duplicates {}, already stored {} (store now holds {})",
        stats.submitted,
        stats.ingested,
        stats.duplicates,
        stats.already_stored,
        store.count().await?
    );
    Ok(())
}

async fn run_query_command(args: QueryArgs) -> anyhow::Result<()> {
    let store = VectorStore::open(&args.db.to_string_lossy()).await?;
    let retriever = VectorRetriever::new(store, build_embedder(&args.embeddings));
    let documents = retriever.retrieve(&args.query, args.k).await?;

    for (rank, doc) in documents.iter().enumerate() {
        println!(
            "--- #{} score={:.4} source={} ---",
            rank + 1,
            doc.score,
            doc.source.as_deref().unwrap_or("-")
        );
        println!("{}", doc.content);
    }
    if documents.is_empty() {
        println!("No documents found");
    }
    Ok(())
}
