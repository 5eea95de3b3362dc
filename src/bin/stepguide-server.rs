//! stepguide-server: WebSocket server for live step-by-step task guidance.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use stepguide::server::{ServerConfig, ServerState, WebSocketServer};
use stepguide::task::Task;
use stepguide::vision::{OpenAiAnalyzer, ReplicateDetector};

/// Live frame ingestion and task progression server
#[derive(Parser)]
#[command(name = "stepguide-server")]
#[command(about = "Guide a user through a task from a live camera stream", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./stepguide.toml if present)
    #[arg(long, env = "STEPGUIDE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to bind
    #[arg(long)]
    port: Option<u16>,

    /// Task file (JSON) to activate on startup
    #[arg(long)]
    task: Option<PathBuf>,

    /// Step index to start the task at
    #[arg(long, default_value_t = 0, requires = "task")]
    start_index: i64,

    /// OpenAI model used for frame analysis
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ServerConfig::load().context("failed to load config")?,
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    init_logging(&config.log_level);

    let mut analyzer = OpenAiAnalyzer::from_env().context("frame analyzer unavailable")?;
    if let Some(model) = cli.model {
        analyzer = analyzer.with_model(model);
    }
    let detector = ReplicateDetector::from_env().context("object detector unavailable")?;

    let state = Arc::new(ServerState::new(
        config,
        Arc::new(analyzer),
        Arc::new(detector),
    ));
    state
        .store()
        .ensure_dir()
        .context("failed to create frame directory")?;

    if let Some(path) = &cli.task {
        let task = Task::from_file(path)
            .with_context(|| format!("failed to load task from {}", path.display()))?;
        tracing::info!(task = task.name(), steps = task.len(), "Activating task");
        state.activate_task(task, cli.start_index);
    }

    if let Some(mut events) = state.monitor().take_receiver() {
        tokio::spawn(async move {
            while let Some(record) = events.recv().await {
                match serde_json::to_string(&record) {
                    Ok(json) => tracing::debug!(target: "stepguide::monitor", "{json}"),
                    Err(e) => tracing::warn!(error = %e, "Unserializable monitor event"),
                }
            }
        });
    }

    let server = WebSocketServer::bind(state.clone()).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    tracing::info!("Waiting for in-flight analyses");
    state.shutdown().await;
    Ok(())
}

/// Initialize logging; `RUST_LOG` wins over the configured level.
fn init_logging(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
