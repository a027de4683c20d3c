use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tilesmith::cli::{run, Cli};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    run(Cli::parse())
}
