//! Command-line entry point: parses arguments, loads and expands a recipe,
//! runs the scheduler, and writes the aggregate execution report.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;

use batch_prover::cache::default_cache_dir;
use batch_prover::collaborators::{LineScanLemmaExtractor, LineScanOutputParser, NoopVersionFilter};
use batch_prover::error::BatchError;
use batch_prover::process_runner::ProcessRunner;
use batch_prover::recipe::{self, Recipe};
use batch_prover::report;
use batch_prover::{ExecutionSummary, ExecutorContext, ResourceManager, ResultCache, Scheduler};

#[derive(Parser, Debug)]
#[command(name = "batch-prover-cli", about = "Batch driver for external theorem-prover runs")]
struct Cli {
    /// Path to the JSON recipe describing prover variants, tasks, and lemmas.
    recipe_file: PathBuf,

    /// Clear the result cache before running, forcing every task to re-execute.
    #[arg(long)]
    revalidate: bool,

    /// Use this directory as the result cache instead of the per-user default.
    #[arg(long, value_name = "PATH")]
    cache_dir: Option<PathBuf>,

    /// Disable result caching entirely for this run.
    #[arg(long)]
    no_cache: bool,

    /// Override the recipe's global CPU-core budget.
    #[arg(long, visible_alias = "max-cores", value_name = "N")]
    jobs: Option<u32>,

    /// Override the recipe's global memory budget, in GiB.
    #[arg(long, value_name = "GIB")]
    max_memory: Option<u32>,

    /// Emit debug-level logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all but warning-and-above logs.
    #[arg(short, long)]
    quiet: bool,
}

fn init_tracing(cli: &Cli) {
    let default_directive = if cli.quiet {
        "warn"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_cache(cli: &Cli) -> Result<ResultCache, BatchError> {
    if cli.no_cache {
        let scratch = std::env::temp_dir().join(format!("batch-prover-scratch-{}", std::process::id()));
        return Ok(ResultCache::new(scratch)?);
    }
    let dir = cli.cache_dir.clone().unwrap_or_else(default_cache_dir);
    Ok(ResultCache::new(dir)?)
}

async fn run(cli: Cli) -> Result<ExecutionSummary, BatchError> {
    let mut loaded = Recipe::load_json(&cli.recipe_file)?;
    if let Some(jobs) = cli.jobs {
        loaded.config.global_max_cores = jobs;
    }
    if let Some(max_memory) = cli.max_memory {
        loaded.config.global_max_memory = max_memory;
    }
    let config = loaded.config.clone();

    let tasks = recipe::expand(&loaded, &LineScanLemmaExtractor)?;
    tracing::info!(count = tasks.len(), "expanded recipe into tasks");

    let cache = build_cache(&cli)?;
    if cli.revalidate {
        cache.clear()?;
    }

    let executor_context = ExecutorContext {
        cache: Arc::new(cache),
        process_runner: Arc::new(ProcessRunner::new()),
        version_filter: Arc::new(NoopVersionFilter),
        output_parser: Arc::new(LineScanOutputParser),
        output_directory: config.output_directory.clone(),
        interrupted: Arc::new(AtomicBool::new(false)),
    };

    let resource_manager = ResourceManager::new(config.global_max_cores, config.global_max_memory);
    let scheduler = Scheduler::new(resource_manager, executor_context);
    let summary = scheduler.run(tasks).await;

    let execution_report = summary.to_report(&config);
    report::write_execution_report(&config.output_directory, &execution_report)?;

    Ok(summary)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(summary) => {
            tracing::info!(
                total = summary.total,
                successful = summary.successful,
                failed = summary.failed,
                "run complete"
            );
            std::process::exit(0);
        }
        Err(err) => {
            tracing::error!(error = %err, "batch run aborted before scheduling completed");
            std::process::exit(1);
        }
    }
}
