mod cli;
mod tree_builder;
mod workflow;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the tree and status output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mirrorpick=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli_args = cli::Cli::parse();

    // Delegate the main application logic to the workflow module
    workflow::run_mirrorpick(cli_args).await
}
