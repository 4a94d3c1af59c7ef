//! lspbridge-gateway — entry point for the aggregator MCP server.
//!
//! Spawns no workers itself at startup (unless `LSP_MCP_EAGER_START` is
//! set); they come up lazily as tools are called. Runs the supervisor's
//! periodic sweep as a background task for the lifetime of the process.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rmcp::{ServiceExt, transport::stdio};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use lspbridge_core::config::{GatewayConfig, Language};
use lspbridge_gateway::manager::BackendManager;
use lspbridge_gateway::supervisor::Supervisor;
use lspbridge_gateway::workspace::WorkspaceCoordinator;
use lspbridge_gateway::Gateway;

/// Multi-language code-intelligence gateway, aggregating per-language MCP workers.
#[derive(Parser, Debug)]
#[command(name = "lspbridge-gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Initial active workspace directory.
    #[arg(short, long, default_value = ".")]
    workspace: std::path::PathBuf,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Registers lspbridge in `.mcp.json` in the current directory.
    Config,
}

impl Args {
    fn parse_log_level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            other => anyhow::bail!("invalid log level: {}", other),
        }
    }
}

fn init_tracing(level: Level) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lspbridge_gateway={level},tower={level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .context("failed to initialize tracing subscriber")?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if matches!(args.command, Some(Command::Config)) {
        return lspbridge_gateway::config::configure();
    }

    init_tracing(args.parse_log_level()?)?;

    let workspace = args
        .workspace
        .canonicalize()
        .context(format!("failed to canonicalize workspace path: {}", args.workspace.display()))?;

    let config = GatewayConfig::from_env();
    info!(workspace = %workspace.display(), auto_update = config.auto_update, "starting lspbridge-gateway");

    let manager = Arc::new(BackendManager::new(config.clone()));
    let coordinator = Arc::new(WorkspaceCoordinator::new());
    coordinator
        .switch(&manager, &workspace)
        .await
        .map_err(|e| anyhow::anyhow!("failed to set initial workspace: {}", e.message))?;

    let supervisor = Supervisor::new(manager.clone(), config.idle_timeout);
    tokio::spawn(async move { supervisor.run().await });

    if config.eager_start {
        let spawns = Language::ALL.map(|language| {
            let manager = manager.clone();
            async move { (language, manager.get_or_spawn(language).await) }
        });
        for (language, result) in futures::future::join_all(spawns).await {
            if let Err(err) = result {
                tracing::warn!(%language, error = %err, "eager start failed");
            }
        }
    }

    let gateway = Gateway::new(manager.clone(), coordinator);

    info!("starting MCP server with stdio transport");
    let service = gateway.serve(stdio()).await.context("failed to start MCP server")?;

    info!("MCP server started, waiting for messages");
    let cancel_token = service.cancellation_token();
    let waiting = service.waiting();
    tokio::pin!(waiting);
    tokio::select! {
        result = &mut waiting => { result?; }
        _ = shutdown_signal() => {
            info!("received shutdown signal, closing backends");
            cancel_token.cancel();
            let _ = waiting.await;
        }
    }

    manager.shutdown_all().await;
    info!("lspbridge-gateway shut down gracefully");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM — whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
