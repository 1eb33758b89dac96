//! Block-propagation simulator CLI.
//!
//! Runs a deterministic discrete-event simulation of block propagation
//! and writes the per-block propagation delays to a timestamped latency
//! file.
//!
//! # Example
//!
//! ```bash
//! # 300 nodes to height 100 with the default tables
//! blockprop-sim --seed 42
//!
//! # A quick run from a JSON config, overriding the node count
//! blockprop-sim --config sim.json --nodes 50 --end-height 20 -o ./out
//! ```

use anyhow::Context;
use blockprop_simulation::{SimulationConfig, SimulationRunner};
use clap::Parser;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Deterministic block-propagation simulator.
///
/// Single-threaded and reproducible: the same seed and configuration
/// produce a byte-identical latency file.
#[derive(Parser, Debug)]
#[command(name = "blockprop-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON configuration file (historical SCREAMING_SNAKE_CASE keys).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of nodes.
    #[arg(short, long)]
    nodes: Option<usize>,

    /// Target mean mining interval in ms.
    #[arg(short, long)]
    interval: Option<u64>,

    /// Stop once any node's tip reaches this height.
    #[arg(short, long)]
    end_height: Option<u64>,

    /// PRNG seed. When omitted, the configured (or default) seed is used.
    #[arg(long)]
    seed: Option<u64>,

    /// Capacity of the propagation observer's FIFO window.
    #[arg(long)]
    window: Option<usize>,

    /// Directory for the latency output file.
    #[arg(short, long, default_value = "./output")]
    out_dir: PathBuf,
}

fn load_config(args: &Args) -> anyhow::Result<SimulationConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => SimulationConfig::default(),
    };

    if let Some(nodes) = args.nodes {
        config = config.with_num_of_nodes(nodes);
    }
    if let Some(interval) = args.interval {
        config = config.with_interval(interval);
    }
    if let Some(height) = args.end_height {
        config = config.with_end_block_height(height);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(window) = args.window {
        config = config.with_propagation_window(window);
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating output directory {}", args.out_dir.display()))?;
    let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f");
    let out_path = args.out_dir.join(format!("latency_{timestamp}.txt"));
    let sink = BufWriter::new(
        File::create(&out_path)
            .with_context(|| format!("creating output file {}", out_path.display()))?,
    );

    let mut runner = SimulationRunner::new(config, sink).context("bootstrapping simulation")?;
    runner.run().context("running simulation")?;

    let stats = runner.stats().clone();
    let final_time = runner.now();
    let max_height = runner.max_tip_height();
    runner
        .finish()
        .context("flushing propagation records")?
        .into_inner()
        .map_err(|e| e.into_error())
        .context("flushing output file")?;

    info!(
        output = %out_path.display(),
        final_time_ms = final_time,
        max_height,
        blocks_minted = stats.blocks_minted,
        messages_sent = stats.messages_sent,
        cbr_failures = stats.cbr_failures,
        stale_mining_tasks = stats.stale_mining_tasks,
        "wrote propagation latencies"
    );
    Ok(())
}
