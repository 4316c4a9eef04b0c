mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "searchsync",
    version,
    about = "Incremental PostgreSQL to Elasticsearch sync"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync pipeline until interrupted
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Run a single pass over every entity and exit
        #[arg(long)]
        once: bool,
        /// Stop after this many runs
        #[arg(long, conflicts_with = "once")]
        max_runs: Option<u64>,
    },
    /// Validate pipeline configuration and connectivity
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run {
            pipeline,
            once,
            max_runs,
        } => commands::run::execute(&pipeline, once, max_runs).await,
        Commands::Check { pipeline } => commands::check::execute(&pipeline).await,
    }
}
