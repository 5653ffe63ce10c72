//! DeepResearch CLI: answer questions with web research and an LLM.
//!
//! Runs the research pipeline from the terminal, serves it over HTTP and
//! manages the local research history.

mod commands;
mod engine;

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
