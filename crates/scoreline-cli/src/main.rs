//! scoreline command-line interface.
//!
//! `scoreline run` starts the pipeline daemon (workers + admin surface);
//! the other subcommands are one-shot operations against the same store.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use scoreline_core::domain::Match;
use scoreline_runtime::admin::{self, AdminState};
use scoreline_runtime::jobs::JobRunner;
use scoreline_runtime::providers::ProviderRegistry;
use scoreline_runtime::resilience::{
    BudgetEnforcer, CircuitBreaker, FallbackGraph, FallbackOrchestrator,
};
use scoreline_runtime::settlement::SettlementOutcome;
use scoreline_runtime::{
    InvalidationBus, Pipeline, RuntimeConfig, Scheduler, SettlementEngine, Store,
};

#[derive(Parser)]
#[command(name = "scoreline", about = "LLM exact-score prediction pipeline", version)]
struct Cli {
    /// Path to the runtime config file.
    #[arg(short, long, default_value = "scoreline.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline daemon: job workers plus the admin surface.
    Run,

    /// Ingest a fixtures file (YAML list of matches) and schedule jobs.
    Schedule {
        /// Path to the fixtures file.
        fixtures: String,
    },

    /// Settle one finished match immediately.
    Settle {
        /// Match id.
        match_id: String,
    },

    /// Print circuit, budget, and queue status.
    Status,

    /// Validate the config and the fallback graph, then exit.
    Validate,
}

/// Maximum fallback hops; one substitution per logical request.
const MAX_FALLBACK_DEPTH: usize = 1;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = RuntimeConfig::from_yaml_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config))?;

    match cli.command {
        Command::Run => run_daemon(config).await,
        Command::Schedule { fixtures } => schedule_fixtures(config, &fixtures).await,
        Command::Settle { match_id } => settle_match(config, &match_id).await,
        Command::Status => print_status(config).await,
        Command::Validate => validate(config),
    }
}

/// Everything the daemon and the one-shot commands share.
struct Runtime {
    store: Arc<Store>,
    pipeline: Arc<Pipeline>,
    circuit: Arc<CircuitBreaker>,
    budget: Arc<BudgetEnforcer>,
    config: Arc<RuntimeConfig>,
}

async fn build_runtime(config: RuntimeConfig) -> Result<Runtime> {
    // A malformed fallback graph is a fatal startup error, never a
    // runtime surprise.
    let graph = FallbackGraph::from_models(&config.models, MAX_FALLBACK_DEPTH)
        .context("fallback graph validation failed")?;
    let registry = Arc::new(
        ProviderRegistry::from_config(&config).context("building provider registry")?,
    );

    let store = Arc::new(Store::open(&config.database_path).await?);
    store
        .seed_models(&config.models.iter().map(|m| m.to_entry()).collect::<Vec<_>>())
        .await?;

    let config = Arc::new(config);
    let bus = Arc::new(InvalidationBus::default());
    let circuit = Arc::new(CircuitBreaker::new(store.clone(), config.circuit_breaker.clone()));
    let budget = Arc::new(BudgetEnforcer::new(store.clone(), config.budget.clone()));
    let fallback = Arc::new(FallbackOrchestrator::new(graph));
    let settlement = Arc::new(SettlementEngine::new(store.clone(), bus.clone()));
    let scheduler = Arc::new(Scheduler::new(store.clone(), config.schedule.clone()));

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        registry,
        circuit.clone(),
        budget.clone(),
        fallback,
        settlement,
        scheduler,
        bus,
        config.clone(),
    ));

    Ok(Runtime {
        store,
        pipeline,
        circuit,
        budget,
        config,
    })
}

async fn run_daemon(config: RuntimeConfig) -> Result<()> {
    let runtime = build_runtime(config).await?;

    // Catch up on anything missed while the process was down before the
    // workers start draining.
    let caught_up = runtime.pipeline.catch_up().await?;
    if caught_up > 0 {
        tracing::info!(jobs = caught_up, "recovered missed schedule slots");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let runner = Arc::new(JobRunner::new(
        runtime.store.clone(),
        runtime.pipeline.clone(),
        runtime.config.workers.clone(),
    ));
    let workers = runner.spawn_workers(shutdown_rx);

    // The admin surface only comes up when its token is configured.
    let token_env = &runtime.config.admin.auth_token_env;
    match std::env::var(token_env) {
        Ok(token) if !token.is_empty() => {
            let state = AdminState {
                store: runtime.store.clone(),
                circuit: runtime.circuit.clone(),
                budget: runtime.budget.clone(),
                model_ids: runtime.config.models.iter().map(|m| m.id.clone()).collect(),
                token: Arc::new(token),
            };
            let bind = runtime.config.admin.bind.clone();
            tokio::spawn(async move {
                if let Err(e) = admin::serve(state, &bind).await {
                    tracing::error!(error = %e, "admin surface failed");
                }
            });
        }
        _ => tracing::warn!(env = %token_env, "admin surface disabled: token not set"),
    }

    tracing::info!("scoreline daemon running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    shutdown_tx.send(true).ok();
    for worker in workers {
        worker.await.ok();
    }
    Ok(())
}

async fn schedule_fixtures(config: RuntimeConfig, path: &str) -> Result<()> {
    let runtime = build_runtime(config).await?;
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let fixtures: Vec<Match> = serde_yaml::from_str(&text).context("parsing fixtures")?;

    let mut scheduled = 0usize;
    for fixture in &fixtures {
        let jobs = runtime.pipeline.ingest_fixture(fixture).await?;
        scheduled += jobs.len();
    }
    println!("{} fixtures ingested, {scheduled} jobs scheduled", fixtures.len());
    Ok(())
}

async fn settle_match(config: RuntimeConfig, match_id: &str) -> Result<()> {
    let runtime = build_runtime(config).await?;
    let bus = Arc::new(InvalidationBus::default());
    let engine = SettlementEngine::new(runtime.store.clone(), bus);

    match engine.settle(match_id).await? {
        SettlementOutcome::Settled(scores) | SettlementOutcome::AlreadySettled(scores) => {
            for s in scores {
                println!("{}  {}:{}  {} pts", s.model_id, s.home, s.away, s.points);
            }
        }
        SettlementOutcome::NoPredictions => println!("no predictions to settle"),
    }
    Ok(())
}

async fn print_status(config: RuntimeConfig) -> Result<()> {
    let runtime = build_runtime(config).await?;

    println!("models:");
    for model in &runtime.config.models {
        let circuit = runtime.circuit.state(&model.id).await;
        let used = runtime.budget.used_today(&model.id).await;
        println!(
            "  {}  circuit={:?}  budget={}/{}",
            model.id,
            circuit,
            used,
            runtime.budget.limit(&model.id),
        );
    }

    println!("jobs:");
    for (status, count) in runtime.store.job_counts().await? {
        println!("  {status}: {count}");
    }
    Ok(())
}

fn validate(config: RuntimeConfig) -> Result<()> {
    if let Err(e) = FallbackGraph::from_models(&config.models, MAX_FALLBACK_DEPTH) {
        bail!("fallback graph invalid: {e}");
    }
    println!("config valid: {} models", config.models.len());
    Ok(())
}
