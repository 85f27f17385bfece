//! Specter CLI: find related class actions, enrich them, and draft a complaint.
//!
//! Facts go in as JSON; matches are enriched through a local cache and the
//! draft is streamed from an OpenAI-compatible model.

mod commands;
mod draft_file;
mod progress;

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
