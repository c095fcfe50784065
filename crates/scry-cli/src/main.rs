use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "scry")]
#[command(about = "Reconstructs a live world view from a process memory image")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = "scry.toml", env = "SCRY_CONFIG", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine until Ctrl+C, printing snapshots
    Run {
        /// Memory image (JSON)
        #[arg(short, long)]
        image: PathBuf,

        /// Print full snapshots as JSON instead of summaries
        #[arg(long)]
        json: bool,

        /// Seconds between printed snapshots
        #[arg(long, default_value_t = 1)]
        every: u64,
    },
    /// Locate the world root once and print it
    Locate {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Walk the layout against an image and report how far it gets
    Status {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Load and validate the configuration
    CheckConfig,
    /// Write a synthetic world (image, config and catalog) into a directory
    Fixture {
        output: PathBuf,

        #[arg(short, long, default_value = "woods")]
        map: String,

        /// Number of observed players to place
        #[arg(short, long, default_value_t = 4)]
        players: u32,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("scry=info".parse()?))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Run { image, json, every } => commands::run::run(&args.config, &image, json, every),
        Command::Locate { image } => commands::locate::run(&args.config, &image),
        Command::Status { image } => commands::status::run(&args.config, &image),
        Command::CheckConfig => commands::check_config::run(&args.config),
        Command::Fixture {
            output,
            map,
            players,
        } => commands::fixture::run(&output, &map, players),
    }
}
