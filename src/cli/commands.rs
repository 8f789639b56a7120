//! CLI command definitions and handlers.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::dataset::Dataset;
use crate::intent::{KeywordIntentExtractor, LlmIntentExtractor};
use crate::llm::LlmClient;
use crate::response::LlmSynthesizer;
use crate::workflow::{RunRequest, RunStatus, WorkflowConfig, WorkflowOrchestrator};

/// Natural-language analysis of tabular datasets.
#[derive(Parser)]
#[command(name = "datapilot")]
#[command(about = "Ask questions about a CSV dataset in plain language")]
#[command(version)]
#[command(
    long_about = "datapilot turns a natural-language request into an analysis plan, runs it against a CSV dataset, and answers in plain language.\n\nExample usage:\n  datapilot run --query \"Summarize the dataset\" --dataset ./data.csv"
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
    /// Run an analysis workflow against a dataset.
    Run(RunArgs),

    /// Inspect a dataset: shape, column types, missing values.
    Inspect(InspectArgs),
}

/// Arguments for `datapilot run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// The natural-language request.
    #[arg(short, long)]
    pub query: String,

    /// Path to the CSV dataset.
    #[arg(short, long)]
    pub dataset: PathBuf,

    /// Maximum training retry cycles.
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Metric value at or above which training is accepted.
    #[arg(long)]
    pub metric_threshold: Option<f64>,

    /// Seed for reproducible training splits.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Skip LLM collaborators even if an endpoint is configured.
    #[arg(long)]
    pub offline: bool,

    /// Print the full run report as JSON instead of the response text.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `datapilot inspect`.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Path to the CSV dataset.
    #[arg(short, long)]
    pub dataset: PathBuf,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the parsed CLI command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_workflow(args).await,
        Commands::Inspect(args) => inspect_dataset(args),
    }
}

/// Handles `datapilot run`.
async fn run_workflow(args: RunArgs) -> anyhow::Result<()> {
    let mut config = WorkflowConfig::from_env().context("invalid configuration")?;
    if let Some(max) = args.max_iterations {
        config = config.with_max_iterations(max);
    }
    if let Some(threshold) = args.metric_threshold {
        config = config.with_metric_threshold(threshold);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    let mut builder = WorkflowOrchestrator::builder().config(config);

    // Use LLM collaborators when an endpoint is configured; otherwise fall
    // back to the deterministic built-ins.
    let use_llm = !args.offline && std::env::var("DATAPILOT_LLM_API_BASE").is_ok();
    if use_llm {
        let client = Arc::new(LlmClient::from_env().context("invalid LLM configuration")?);
        let model = client.default_model().to_string();
        info!(model = %model, "Using LLM collaborators");
        builder = builder
            .intent_extractor(Arc::new(LlmIntentExtractor::new(
                Arc::clone(&client) as Arc<dyn crate::llm::LlmProvider>,
                model.clone(),
            )))
            .synthesizer(Arc::new(LlmSynthesizer::new(
                client as Arc<dyn crate::llm::LlmProvider>,
                model,
            )));
    } else {
        info!("Using offline keyword intent extraction");
        builder = builder.intent_extractor(Arc::new(KeywordIntentExtractor::new()));
    }

    let orchestrator = builder.build().context("invalid configuration")?;
    let report = orchestrator
        .run(RunRequest::new(&args.query, &args.dataset))
        .await;

    if args.json {
        println!("{}", report.to_json_pretty()?);
    } else {
        println!("{}", report.final_response);
        println!();
        println!(
            "status: {} | iterations: {} | duration: {}ms",
            report.status, report.iteration_count, report.duration_ms
        );
    }

    if report.status == RunStatus::Aborted {
        anyhow::bail!("run aborted: see response above");
    }
    Ok(())
}

/// Handles `datapilot inspect`.
fn inspect_dataset(args: InspectArgs) -> anyhow::Result<()> {
    let dataset = Dataset::from_csv_path(&args.dataset).context("failed to load dataset")?;
    print!("{}", dataset.descriptor().render());
    Ok(())
}
