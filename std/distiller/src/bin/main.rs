//! Binary entry point for the distill-mcp server.

use clap::{Parser, Subcommand};
use distill_mcp::{Config, DistillerServer, gmail::auth, llm};
use rmcp::ServiceExt;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// AI News Distiller MCP server, served over stdio.
#[derive(Parser)]
#[command(name = "distill-mcp", version, about)]
struct Cli {
    /// Log at debug level regardless of RUST_LOG.
    #[arg(long, global = true)]
    debug: bool,

    /// Google OAuth client file.
    #[arg(long, global = true, env = "DISTILL_CREDENTIALS", default_value = "credentials.json")]
    credentials: PathBuf,

    /// Stored Gmail token.
    #[arg(long, global = true, env = "DISTILL_TOKEN", default_value = "token.json")]
    token: PathBuf,

    /// Anthropic model used for distilling.
    #[arg(long, env = "DISTILL_MODEL", default_value = llm::DEFAULT_MODEL)]
    model: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Grant read-only Gmail access and store the token.
    Authorize,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(filter)
        .init();

    if let Err(e) = run(cli).await {
        tracing::error!("{e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(Command::Authorize) = cli.command {
        auth::authorize(&cli.credentials, &cli.token).await?;
        return Ok(());
    }

    let config = Config {
        token: cli.token,
        model: cli.model,
        api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
        ..Default::default()
    };
    tracing::info!(
        "starting AI News Distiller MCP server, cwd {}",
        std::env::current_dir()?.display()
    );
    let server = DistillerServer::new(config);
    let running = server.serve(rmcp::transport::stdio()).await?;
    running.waiting().await?;
    tracing::info!("client disconnected, exiting");
    Ok(())
}
