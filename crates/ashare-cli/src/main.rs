//! Entry point for the filing-pipeline runner.

#![forbid(unsafe_code)]

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use ashare_adapters::embed::HttpEmbeddingAdapter;
use ashare_adapters::llm::HttpLlmExtractor;
use ashare_core::config::Config;
use ashare_core::logging::{self, LogFormat};
use ashare_core::metrics::MetricsRegistry;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

mod maintenance;

/// Incremental filing-to-knowledge-base pipeline runner.
#[derive(Parser)]
#[command(name = "ashare-pipeline", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Minimum log level (trace, debug, info, warn, error). Overridden by
    /// `RUST_LOG` when that variable is set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    log_format: LogFormatArg,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Walk the filing directories and process everything not yet complete
    /// (the default when no subcommand is given).
    Run(RunArgs),
}

#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Override the configured annual-report filing directory.
    #[arg(long)]
    annual_reports_dir: Option<std::path::PathBuf>,

    /// Override the configured research-report filing directory.
    #[arg(long)]
    research_reports_dir: Option<std::path::PathBuf>,

    /// Re-run every stage even where a checkpoint already reports success.
    #[arg(long)]
    force_reprocess: bool,

    /// Print the work list the gap analyzer would process and exit without
    /// touching the database, checkpoints, or locks.
    #[arg(long)]
    dry_run: bool,

    /// Truncate `companies`, `source_documents`, and
    /// `business_concepts_master` before running.
    #[arg(long)]
    clear_db: bool,

    /// Delete every checkpoint file before running, forcing every stage of
    /// every document to start fresh.
    #[arg(long)]
    clear_checkpoints: bool,

    /// After processing, rebuild embeddings for every active concept of
    /// every known company, not just concepts missing one.
    #[arg(long)]
    build_indices: bool,

    /// Shorthand for `--force-reprocess --clear-db --clear-checkpoints
    /// --build-indices`.
    #[arg(long)]
    full_rebuild: bool,

    /// Cap on documents processed concurrently.
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Run pending migrations before connecting the pool, regardless of the
    /// `ASHARE_AUTO_MIGRATE` setting. Meant for explicit, supervised use.
    #[arg(long)]
    migrate: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_format.into(), &cli.log_level);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let run_args = match cli.command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
        Commands::Run(args) => args,
    };

    runtime.block_on(run(run_args))
}

async fn run(args: RunArgs) -> ExitCode {
    let mut cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = args.annual_reports_dir {
        cfg.annual_reports_dir = dir;
    }
    if let Some(dir) = args.research_reports_dir {
        cfg.research_reports_dir = dir;
    }
    if let Some(max) = args.max_concurrent {
        cfg.max_concurrent = max;
    }

    let full_rebuild = args.full_rebuild;
    let force_reprocess = args.force_reprocess || full_rebuild;
    let clear_db = args.clear_db || full_rebuild;
    let clear_checkpoints = args.clear_checkpoints || full_rebuild;
    let build_indices = args.build_indices || full_rebuild;
    if args.migrate {
        cfg.auto_migrate = true;
    }

    let pool = match ashare_db::build_pool(&cfg).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("failed to connect to the database: {e}");
            return ExitCode::FAILURE;
        }
    };

    if clear_db {
        if let Err(e) = maintenance::clear_database(&pool).await {
            eprintln!("failed to clear the database: {e}");
            return ExitCode::FAILURE;
        }
        tracing::info!("cleared companies, source_documents, business_concepts_master");
    }

    if clear_checkpoints {
        if let Err(e) = maintenance::clear_checkpoints(&cfg.checkpoints_dir) {
            eprintln!("failed to clear checkpoints: {e}");
            return ExitCode::FAILURE;
        }
        tracing::info!(dir = %cfg.checkpoints_dir.display(), "cleared checkpoint directory");
    }

    if force_reprocess {
        if let Err(e) = ashare_lock::release_all(&cfg.locks_dir) {
            tracing::warn!(error = %e, "failed to clear stale lock files before a forced reprocess");
        }
    }

    let report = match ashare_pipeline::analyze(&cfg, &pool).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("gap analysis failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        pending = report.work_items.len(),
        skipped_artifact_exists = report.skipped_artifact_exists,
        skipped_cost_avoidance = report.skipped_cost_avoidance,
        skipped_already_complete = report.skipped_already_complete,
        "gap analysis complete"
    );

    if args.dry_run {
        for item in &report.work_items {
            println!("{}", item.path.display());
        }
        println!("{} file(s) pending processing", report.work_items.len());
        return ExitCode::SUCCESS;
    }

    let llm_endpoint = match std::env::var("ASHARE_LLM_ENDPOINT") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("ASHARE_LLM_ENDPOINT must be set to run the pipeline");
            return ExitCode::FAILURE;
        }
    };
    let embedding_endpoint = match std::env::var("ASHARE_EMBEDDING_ENDPOINT") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("ASHARE_EMBEDDING_ENDPOINT must be set to run the pipeline");
            return ExitCode::FAILURE;
        }
    };

    let breaker_reset = Duration::from_secs(cfg.circuit_breaker_reset_secs);
    let llm = Arc::new(HttpLlmExtractor::new(
        llm_endpoint,
        cfg.circuit_breaker_threshold,
        breaker_reset,
    ));
    let embedder = Arc::new(HttpEmbeddingAdapter::new(
        embedding_endpoint,
        cfg.embedding_dimension,
        cfg.embedding_batch_size,
        cfg.circuit_breaker_threshold,
        breaker_reset,
    ));
    let metrics = Arc::new(MetricsRegistry::new());

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight documents and stopping");
            cancel_for_signal.cancel();
        }
    });

    let orchestrator = ashare_pipeline::Orchestrator {
        cfg: cfg.clone(),
        pool: pool.clone(),
        llm,
        embedder: embedder.clone(),
        metrics,
    };

    let interrupted_check = cancel.clone();
    let summary = orchestrator.run(report.work_items, cancel).await;
    let interrupted = interrupted_check.is_cancelled();

    tracing::info!(
        processed = summary.processed,
        succeeded = summary.succeeded,
        failed = summary.failed,
        lock_skipped = summary.lock_skipped,
        cancelled = summary.cancelled,
        concepts_created = summary.concepts_created,
        concepts_updated = summary.concepts_updated,
        embedded = summary.embedded,
        "run complete"
    );

    if build_indices {
        match maintenance::rebuild_all_indices(&pool, embedder.as_ref(), &cfg).await {
            Ok(rebuilt) => tracing::info!(embedded = rebuilt, "rebuilt embeddings for every active concept"),
            Err(e) => {
                eprintln!("failed to rebuild vector indices: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if summary.cancelled > 0 || interrupted {
        ExitCode::from(130)
    } else if summary.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
