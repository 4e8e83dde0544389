//! Main entry point for the hactl command line interface.
//!
//! Parses the command tree, initializes logging and hands the parsed
//! intent to the command dispatcher. Fatal errors are printed to
//! stderr and turn into a non-zero exit code.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .without_time()
        .init();

    let cli = commands::Cli::parse();
    if let Err(e) = commands::run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
