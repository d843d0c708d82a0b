use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vectormind::config::Config;
use vectormind::mcp::server::{McpContext, McpServer};
use vectormind::retrieval::RetrievalService;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP tools over stdio (default)
    Serve,
    /// Validate the configuration and test the embedding provider
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the MCP protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // 1. Load and validate config
    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;

    // 2. Build embedding client and vector store
    let service = Arc::new(RetrievalService::from_config(config)?);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            info!("Starting VectorMind MCP server...");
            let server = McpServer::new(McpContext { service });
            server.start().await?;
        }
        Commands::Check => {
            let report = service.check_connection().await;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render report")?
            );
            if !report.embedding {
                error!("embedding provider check failed");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
