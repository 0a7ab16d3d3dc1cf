//! qlayout - lay out graphs with the threaded quadlayout engine.
//!
//! Reads node definitions as JSON, runs the force-directed simulation and
//! writes the positioned nodes back.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use quadlayout::Technique;
use tracing::Level;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{config as config_cmd, generate, run};

/// qlayout - force-directed graph layout.
///
/// Configuration is layered: defaults, `--config` file, `QLAYOUT_*`
/// environment variables, then command-line flags.
#[derive(Parser, Debug)]
#[command(
    name = "qlayout",
    author,
    version,
    about = "Force-directed graph layout on a quad-tree",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// JSON engine configuration file.
    #[arg(long, global = true, env = "QLAYOUT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Lay out a graph file.
    ///
    /// Nodes without a position are placed at random. The result is written
    /// back to the input unless `--output` is given.
    Run {
        /// Node definitions (JSON array).
        input: PathBuf,

        /// Where to write the laid out nodes.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum number of simulation steps.
        #[arg(long, default_value_t = 500)]
        steps: u64,

        /// Stop early once the layout has settled.
        #[arg(long)]
        until_settled: bool,

        /// Repulsion technique: no_repulse, brute_force, quad or fuzzy.
        #[arg(short, long, default_value = "quad")]
        technique: Technique,

        /// Ignore stored positions and start from random ones.
        #[arg(long)]
        random: bool,

        /// Override the worker thread count.
        #[arg(long)]
        workers: Option<usize>,

        /// Override the world edge length.
        #[arg(long)]
        extent: Option<f32>,

        /// Override the quad-tree depth.
        #[arg(long)]
        depth: Option<u8>,

        /// Print final statistics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate a synthetic graph.
    Generate {
        /// Graph shape.
        #[arg(value_enum)]
        shape: generate::Shape,

        /// Number of nodes.
        #[arg(short, long, default_value_t = 100)]
        nodes: u64,

        /// Distance between neighboring nodes.
        #[arg(long, default_value_t = 40.0)]
        spacing: f32,

        /// Edges per node for random graphs.
        #[arg(long, default_value_t = 2)]
        degree: usize,

        /// Seed for random graphs.
        #[arg(long)]
        seed: Option<u64>,

        /// Output file (defaults to stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the effective engine configuration.
    Config {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flags.
    let level = if cli.quiet {
        Level::ERROR
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            input,
            output,
            steps,
            until_settled,
            technique,
            random,
            workers,
            extent,
            depth,
            json,
        } => {
            if let Some(workers) = workers {
                config.worker_count = workers;
            }
            if let Some(extent) = extent {
                config.world_extent = extent;
            }
            if let Some(depth) = depth {
                config.max_depth = depth;
            }
            // A batch run wants reproducible steps and no idle ticks.
            config.fixed_dt.get_or_insert(0.016);
            config.tick_interval_ms = 0;
            config.validate()?;

            let options = run::RunOptions {
                input,
                output,
                steps,
                until_settled,
                technique,
                force_random: random,
                json,
            };
            run::execute(config, &options)?;
        }

        Commands::Generate {
            shape,
            nodes,
            spacing,
            degree,
            seed,
            output,
        } => {
            generate::execute(shape, nodes, spacing, degree, seed, output.as_deref())?;
        }

        Commands::Config { json } => {
            config.validate()?;
            config_cmd::show(&config, json)?;
        }
    }

    Ok(())
}
