//! Binary entry point for the mcp-projectfs server.

use anyhow::Result;
use clap::Parser;
use mcp_projectfs::ProjectServer;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

/// Project inspection server — filesystem tools over line-delimited
/// JSON-RPC on stdio.
#[derive(Parser)]
#[command(name = "mcp-projectfs", version, about)]
struct Cli {
    /// Project root all relative paths are resolved against.
    #[arg(env = "PROJECT_PATH", default_value = ".")]
    root: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var_os("RUST_LOG").is_some() {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }
    let cli = Cli::parse();
    let server = ProjectServer::new(cli.root);
    info!(root = %server.root().display(), "serving project directory");

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = server.serve() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, exiting");
        }
        _ = sigterm.recv() => {
            info!("terminated, exiting");
        }
    }
    Ok(())
}
