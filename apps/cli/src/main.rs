//! repoctx CLI: batch generation of AI-ready context for source repositories.
//!
//! Walks repositories, builds a knowledge graph per repository, and writes
//! a tiered set of context artifacts plus a batch run report.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
