use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use formcheck_server::analysis::RuleRegistry;
use formcheck_server::config;
use formcheck_server::jobs::{
    Orchestrator, RetryPolicy, SqliteAnalysisJobStore, SubmitRequest, WorkerPool,
};
use formcheck_server::landmarks::JsonlLandmarkSource;
use formcheck_server::metrics;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing the analysis jobs database.
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Directory holding `<video>.landmarks.jsonl` files from the pose detector.
    /// Defaults to `<db_dir>/landmarks`.
    #[clap(long, value_parser = parse_path)]
    pub landmarks_dir: Option<PathBuf>,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// Number of concurrent analysis workers.
    #[clap(long)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the analysis workers and the metrics endpoint until Ctrl+C.
    Serve,
    /// Queue a video for analysis and print the job id.
    Submit {
        video_reference: String,
        exercise_id: String,
        #[clap(long, default_value = "local")]
        owner: String,
    },
    /// Print the status of a job as JSON.
    Status { job_id: String },
    /// List an owner's jobs, newest first.
    List {
        owner: String,
        #[clap(long)]
        exercise: Option<String>,
    },
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            landmarks_dir: args.landmarks_dir.clone(),
            metrics_port: args.metrics_port,
            workers: args.workers,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    let store = Arc::new(SqliteAnalysisJobStore::new(app_config.analysis_db_path())?);
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        Arc::new(JsonlLandmarkSource::new(&app_config.landmarks_dir)),
        Arc::new(RuleRegistry::with_defaults()),
        &app_config.analysis,
        RetryPolicy::new(&app_config.retry),
    ));

    match cli_args.command {
        Command::Serve => serve(app_config, orchestrator).await,
        Command::Submit {
            video_reference,
            exercise_id,
            owner,
        } => {
            let job_id = orchestrator.submit(SubmitRequest {
                video_reference,
                exercise_id,
                owner_id: owner,
            })?;
            println!("{}", job_id);
            Ok(())
        }
        Command::Status { job_id } => {
            let view = orchestrator.status(&job_id)?;
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
        Command::List { owner, exercise } => {
            for job in orchestrator.list_for_owner(&owner, exercise.as_deref())? {
                let score = job
                    .result
                    .as_ref()
                    .and_then(|r| r.overall_score)
                    .map(|s| format!("{:.3}", s))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {:<10}  {:<10}  {:>6}  {}",
                    job.id, job.status, job.exercise_id, score, job.video_reference
                );
            }
            Ok(())
        }
    }
}

async fn serve(app_config: config::AppConfig, orchestrator: Arc<Orchestrator>) -> Result<()> {
    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  landmarks_dir: {:?}", app_config.landmarks_dir);
    info!("  workers: {}", app_config.workers.count);

    info!("Initializing metrics...");
    metrics::init_metrics();

    let shutdown_token = CancellationToken::new();

    let metrics_addr = format!("0.0.0.0:{}", app_config.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {}", metrics_addr))?;
    let metrics_app = Router::new().route("/metrics", get(metrics::metrics_handler));
    let metrics_shutdown = shutdown_token.clone();
    let metrics_server = tokio::spawn(async move {
        let result = axum::serve(metrics_listener, metrics_app)
            .with_graceful_shutdown(async move { metrics_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            error!("Metrics server error: {}", e);
        }
    });
    info!("Metrics available at port {}!", app_config.metrics_port);

    let pool = WorkerPool::new(orchestrator, app_config.workers.clone(), shutdown_token.clone());
    let pool_handle = tokio::spawn(pool.run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, initiating graceful shutdown");
    shutdown_token.cancel();

    if let Err(e) = pool_handle.await {
        error!("Worker pool task failed: {}", e);
    }
    let _ = metrics_server.await;
    info!("Shutdown complete");
    Ok(())
}
