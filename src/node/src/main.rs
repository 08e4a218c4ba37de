//! MeerDAG Node - Main Binary
//!
//! Block-DAG consensus node with:
//! - PHANTOM or GHOSTDAG ordering
//! - RocksDB persistent storage
//! - Background tip pruning and payload eviction
//! - Prometheus metrics

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use meerdag_node::{unix_now, DagNode, NodeConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

/// MeerDAG Node CLI
#[derive(Parser)]
#[command(name = "meerdag-node")]
#[command(about = "MeerDAG Node - PHANTOM/GHOSTDAG block-DAG consensus")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "MEERDAG_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides config)
    #[arg(long, env = "MEERDAG_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node until interrupted (default)
    Run,

    /// Print a summary of the stored DAG
    Info {
        #[arg(short, long, value_enum, default_value = "text")]
        format: InfoFormat,

        /// Also print the Prometheus metrics
        #[arg(long)]
        metrics: bool,
    },

    /// Produce random blocks on top of the current tips
    Simulate {
        /// Number of blocks to produce
        #[arg(short, long, default_value_t = 100)]
        blocks: u32,

        /// Largest number of tips one block merges
        #[arg(short, long, default_value_t = 3)]
        width: usize,

        /// Seed of the tip selection
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum InfoFormat {
    Text,
    Json,
    Dot,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = data_dir;
    }

    // Initialize logging
    let log_level = if cli.verbose { "debug".to_string() } else { config.node.log_level.clone() };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},meerdag={}", log_level, log_level).into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    if let Some(path) = &cli.config {
        info!("Loaded configuration from {:?}", path);
    }

    // Validate configuration
    config.validate()?;

    let node = DagNode::open(config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            info!("Starting MeerDAG Node v{}", env!("CARGO_PKG_VERSION"));
            node.ensure_genesis_block()?;
            if let Err(e) = node.run(shutdown_signal()).await {
                error!("Node error: {}", e);
                return Err(e);
            }
            info!("Node stopped gracefully");
        }
        Command::Info { format, metrics } => {
            match format {
                InfoFormat::Text => {
                    let info = node.info()?;
                    println!("algorithm:   {} (k = {})", info.algorithm, info.k);
                    println!("blocks:      {}", info.blocks);
                    println!("genesis:     {}", info.genesis.as_deref().unwrap_or("-"));
                    println!("main height: {}", info.main_height);
                    println!("main order:  {}", info.main_order);
                    println!("layer:       {}", info.layer);
                    println!("next bits:   {}", info.next_bits);
                    for tip in &info.tips {
                        println!("tip:         {}", tip);
                    }
                }
                InfoFormat::Json => println!("{}", serde_json::to_string_pretty(&node.info()?)?),
                InfoFormat::Dot => println!("{}", node.export_dot()),
            }
            if metrics {
                print!("{}", node.dag().metrics().export()?);
            }
        }
        Command::Simulate { blocks, width, seed } => {
            simulate(&node, blocks, width.max(1), seed)?;
            node.shutdown()?;
        }
    }

    Ok(())
}

/// Produce `blocks` blocks, each merging a random non-empty subset of at
/// most `width` tips
fn simulate(node: &DagNode, blocks: u32, width: usize, seed: u64) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    node.ensure_genesis_block()?;
    let mut timestamp = unix_now();

    for nonce in 0..blocks {
        let tips = node.dag().tips();
        let count = rng.gen_range(1..=width.min(tips.len()));
        let start = rng.gen_range(0..tips.len());
        let parents = (0..count).map(|i| tips[(start + i) % tips.len()]).collect();

        timestamp += rng.gen_range(1..60);
        let block = node.template(parents, timestamp, u64::from(nonce))?;
        let outcome = node.submit(block)?;
        info!(
            block = %outcome.block.hash,
            order = outcome.block.order,
            layer = outcome.block.layer,
            reordered = outcome.invalidated_orders.len(),
            "simulated block"
        );
    }

    let info = node.info()?;
    info!(
        blocks = info.blocks,
        tips = info.tips.len(),
        main_height = info.main_height,
        "simulation finished"
    );
    Ok(())
}

/// Ctrl+C or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received shutdown signal (Ctrl+C)"),
                    _ = sigterm.recv() => info!("Received shutdown signal (SIGTERM)"),
                }
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                let _ = signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("Received shutdown signal (Ctrl+C)");
    }
}
