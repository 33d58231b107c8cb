//! Refinery CLI: runs configured transformation chains over JSON files and
//! drives the batch-size auto-tuner.

mod commands;
mod io;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Refinery: composable record transformations with a self-tuning batch size
#[derive(Parser, Debug)]
#[command(name = "refinery", version, about, long_about = None)]
pub struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file path (replaces .refinery/pipeline.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run the configured operator chain over an input file
    Run {
        /// Input file (.json array or .jsonl)
        input: PathBuf,
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write quarantined records here
        #[arg(long)]
        quarantine: Option<PathBuf>,
        /// Override the configured batch size
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Write metadata and timestamps alongside each payload
        #[arg(long)]
        with_metadata: bool,
        /// Append this run to the tuner history
        #[arg(long)]
        record_performance: bool,
    },
    /// Infer a schema from a sample of an input file
    InferSchema {
        input: PathBuf,
        /// Maximum records sampled
        #[arg(long)]
        sample_size: Option<usize>,
    },
    /// Query or feed the batch-size auto-tuner
    Tune {
        #[command(subcommand)]
        action: TuneAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum TuneAction {
    /// Record one run's metrics
    Record {
        #[arg(long)]
        pipeline: Option<String>,
        #[arg(long)]
        records: u64,
        #[arg(long)]
        duration: f64,
        #[arg(long)]
        batch_size: usize,
        #[arg(long, default_value_t = 0.0)]
        memory_mb: f64,
        /// Mark the run as failed with this message
        #[arg(long)]
        failed: Option<String>,
    },
    /// Recommend a batch size from history
    Recommend {
        #[arg(long)]
        pipeline: Option<String>,
        /// Batch size currently in use
        #[arg(long)]
        current: Option<usize>,
    },
    /// Summarize recorded history
    Summary {
        #[arg(long)]
        pipeline: Option<String>,
    },
    /// Suggest the next batch size to try
    Suggest {
        #[arg(long)]
        pipeline: Option<String>,
        #[arg(long)]
        current: Option<usize>,
    },
    /// List pipelines with recorded history
    List,
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Create an example configuration file
    Init,
    /// Show the effective configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "refinery", "refinery")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "refinery.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref())
}
