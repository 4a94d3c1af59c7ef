//! lspbridge-worker — entry point for a single-language LSP worker.
//!
//! The gateway spawns one of these per enabled language, passing
//! `--language` and the workspace it should start in. Everything else
//! (connection pooling, document cache, tool surface) lives in the
//! library crate.

use anyhow::{Context, Result};
use clap::Parser;
use rmcp::{ServiceExt, transport::stdio};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use lspbridge_core::config::{Language, PythonProvider};
use lspbridge_worker::pool::ServerLaunch;
use lspbridge_worker::Worker;

/// A single-language LSP worker exposed over MCP.
#[derive(Parser, Debug)]
#[command(name = "lspbridge-worker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Language this worker serves.
    #[arg(short, long, value_parser = parse_language)]
    language: Language,

    /// Which backend to use for the Python worker (ignored otherwise).
    #[arg(long, value_parser = parse_python_provider, default_value = "python-lsp-mcp")]
    python_provider: PythonProvider,

    /// Initial active workspace directory.
    #[arg(short, long, default_value = ".")]
    workspace: std::path::PathBuf,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_language(s: &str) -> Result<Language, String> {
    Language::parse(s).ok_or_else(|| format!("unknown language: {s}"))
}

fn parse_python_provider(s: &str) -> Result<PythonProvider, String> {
    PythonProvider::parse(s).ok_or_else(|| format!("unknown python provider: {s}"))
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
        .unwrap_or_else(|_| EnvFilter::new(format!("lspbridge_worker={level},tower={level},async_lsp={level}")));

    // Logs go to stderr; stdout is reserved for MCP framing.
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

fn launch_for(language: Language, python_provider: PythonProvider) -> ServerLaunch {
    match language {
        Language::Python => match python_provider {
            PythonProvider::PythonLspMcp => ServerLaunch {
                command: "pylsp".into(),
                args: vec![],
                language_id: "python".into(),
            },
            PythonProvider::PyrightMcp => ServerLaunch {
                command: "pyright-langserver".into(),
                args: vec!["--stdio".into()],
                language_id: "python".into(),
            },
        },
        Language::TypeScript => ServerLaunch {
            command: "typescript-language-server".into(),
            args: vec!["--stdio".into()],
            language_id: "typescript".into(),
        },
        Language::Vue => ServerLaunch {
            command: "vue-language-server".into(),
            args: vec!["--stdio".into()],
            language_id: "vue".into(),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.parse_log_level()?)?;

    let workspace = args
        .workspace
        .canonicalize()
        .context(format!("failed to canonicalize workspace path: {}", args.workspace.display()))?;

    info!(
        language = %args.language,
        workspace = %workspace.display(),
        "starting lspbridge-worker"
    );

    let launch = launch_for(args.language, args.python_provider);
    let server = Worker::new(args.language, launch);
    server.set_active_workspace(workspace).await;

    info!("starting MCP server with stdio transport");
    let service = server.serve(stdio()).await.context("failed to start MCP server")?;

    info!("MCP server started, waiting for messages");
    service.waiting().await?;

    info!("lspbridge-worker shut down gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_for_python_default_provider() {
        let launch = launch_for(Language::Python, PythonProvider::PythonLspMcp);
        assert_eq!(launch.command, "pylsp");
    }

    #[test]
    fn test_launch_for_vue() {
        let launch = launch_for(Language::Vue, PythonProvider::PythonLspMcp);
        assert_eq!(launch.command, "vue-language-server");
    }
}
