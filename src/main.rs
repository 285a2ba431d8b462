//! framepipe - Main Entry Point
//!
//! Loads a pipeline file, builds the graph with the built-in node types and
//! runs it until every source ends, the cycle limit is reached, or a node
//! fails fatally. Per-node statistics are printed as JSON at the end.

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use framepipe::{ExecutionMode, NodeRegistry, Pipeline, PipelineConfig, PipelineEvent};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Centralized,
    RealTime,
}

impl From<Mode> for ExecutionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Centralized => ExecutionMode::Centralized,
            Mode::RealTime => ExecutionMode::RealTime,
        }
    }
}

/// Run a node pipeline described by a TOML or JSON file
#[derive(Parser, Debug)]
#[command(name = "framepipe", version)]
#[command(about = "Run a frame-by-frame node pipeline")]
struct Args {
    /// Pipeline file (*.toml or *.json)
    config: PathBuf,

    /// Stop after this many central cycles
    #[arg(long)]
    cycles: Option<u64>,

    /// Override the scheduling discipline
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Run without pacing delays
    #[arg(long)]
    fast: bool,

    /// Write the final statistics to this file instead of stdout
    #[arg(long)]
    stats_out: Option<PathBuf>,

    /// Also print the final graph snapshot
    #[arg(long)]
    status: bool,
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,framepipe=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("Starting framepipe with {:?}", args.config);

    let mut config = PipelineConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(mode) = args.mode {
        config.options.mode = mode.into();
    }
    if let Some(cycles) = args.cycles {
        config.options.max_cycles = Some(cycles);
    }
    if args.fast {
        config.options.real_time = false;
    }

    let mut pipeline = Pipeline::from_config(&config, &NodeRegistry::with_builtins())
        .context("failed to build pipeline")?;
    let handle = pipeline.handle();
    let events = handle.events();

    let result = pipeline.run();

    for event in events.try_iter() {
        match event {
            PipelineEvent::NodeRecovered { .. } | PipelineEvent::AsyncDropped { .. } => {}
            other => tracing::debug!("Event: {:?}", other),
        }
    }

    let statistics = result.context("pipeline terminated")?;
    let json = serde_json::to_string_pretty(&statistics)?;
    match &args.stats_out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!("Statistics written to {:?}", path);
        }
        None => println!("{}", json),
    }
    if args.status {
        println!("{}", serde_json::to_string_pretty(&handle.status())?);
    }

    tracing::info!("Shutting down...");
    Ok(())
}
