//! CLI commands for tilesmith.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;

use crate::builder::GraphBuilder;
use crate::config::Config;
use crate::transform;

#[derive(Parser)]
#[command(name = "tilesmith")]
#[command(about = "Build routable graph tiles from an OSM extract", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build graph tiles from an OSM PBF dump
    Build {
        /// Input OSM PBF file
        #[arg(short, long)]
        input: PathBuf,

        /// JSON config file (built-in defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the configured tile output directory
        #[arg(long)]
        tile_dir: Option<PathBuf>,

        /// Tile-writer worker count (default: available parallelism)
        #[arg(short, long)]
        workers: Option<usize>,
    },
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Build {
            input,
            config,
            tile_dir,
            workers,
        } => {
            let mut config = match config {
                Some(path) => Config::from_file(path)?,
                None => Config::default(),
            };
            if let Some(dir) = tile_dir {
                config.mjolnir.tile_dir = dir;
            }
            let workers = workers
                .unwrap_or_else(|| {
                    std::thread::available_parallelism()
                        .map(|n| n.get())
                        .unwrap_or(1)
                })
                .max(1);

            println!("Building tiles from {}", input.display());
            println!("  tile dir: {}", config.mjolnir.tile_dir.display());
            let start = Instant::now();

            let transform = transform::from_config(&config.tagtransform)?;
            let mut builder = GraphBuilder::new(transform);
            builder.build(&input, &config, workers)?;

            println!("Total time: {:.2}s", start.elapsed().as_secs_f64());
            Ok(())
        }
    }
}
