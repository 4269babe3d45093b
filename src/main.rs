//! lakequery binary entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lakequery::cli::{Cli, execute};

#[tokio::main]
#[allow(clippy::print_stdout, clippy::print_stderr)]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "lakequery=debug" } else { "lakequery=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match execute(&cli).await {
        Ok(output) => print!("{output}"),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}
