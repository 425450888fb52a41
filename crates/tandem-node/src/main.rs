//! tandem binary: two-device pipelined training exercise.
//!
//! ```bash
//! # Train the two-part model for the default 10 epochs
//! RUST_LOG=info cargo run --bin tandem -- train
//!
//! # Smaller model, range timings in the log
//! RUST_LOG=tandem_pipeline=debug cargo run --bin tandem -- train --hidden-dim 256 --markers
//!
//! # Pipelined vs unsharded forward pass, reports as JSON
//! cargo run --bin tandem -- compare --split-size 64 --json
//! ```

mod model;
mod train;

use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tandem_pipeline::{Markers, NoMarkers, TracingMarkers};
use tandem_types::config::{DeviceConfig, PipelineConfig, TrainConfig};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "tandem",
    version = env!("CARGO_PKG_VERSION"),
    about   = "Two-stage pipelined execution across a pair of devices"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train Linear(input→hidden) on accel:0 and Linear(hidden→output) on accel:1.
    Train(RunArgs),

    /// Time one forward pass pipelined and unsharded, and check they agree.
    Compare {
        #[command(flatten)]
        run: RunArgs,

        /// Print both run reports as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, default_value_t = 1024)]
    input_dim: usize,

    #[arg(long, default_value_t = 2048)]
    hidden_dim: usize,

    #[arg(long, default_value_t = 1)]
    output_dim: usize,

    #[arg(long, default_value_t = 512)]
    batch_size: usize,

    /// Rows per pipeline shard.
    #[arg(long, default_value_t = 128)]
    split_size: usize,

    #[arg(long, default_value_t = 10)]
    epochs: u32,

    #[arg(long, default_value_t = 0.001)]
    lr: f32,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Command-queue slots per device and per link.
    #[arg(long, default_value_t = 64)]
    queue_depth: usize,

    /// Simulated latency of every cross-device copy, in microseconds.
    #[arg(long, default_value_t = 0)]
    link_latency_us: u64,

    /// Log each marker range with its duration (at debug level).
    #[arg(long)]
    markers: bool,
}

impl RunArgs {
    fn train_config(&self) -> TrainConfig {
        TrainConfig {
            input_dim: self.input_dim,
            hidden_dim: self.hidden_dim,
            output_dim: self.output_dim,
            batch_size: self.batch_size,
            split_size: self.split_size,
            num_epochs: self.epochs,
            learning_rate: self.lr,
            seed: self.seed,
        }
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            shard_size: self.split_size,
        }
    }

    fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            queue_depth: self.queue_depth,
            link_latency_us: self.link_latency_us,
        }
    }

    fn markers(&self) -> Arc<dyn Markers> {
        if self.markers {
            Arc::new(TracingMarkers::new())
        } else {
            Arc::new(NoMarkers)
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // Default log level: INFO. Override with RUST_LOG=tandem_pipeline=debug etc.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train(args)          => run_train(&args).await,
        Command::Compare { run, json } => run_compare(&run, json).await,
    }
}

// ── Train ─────────────────────────────────────────────────────────────────────

async fn run_train(args: &RunArgs) -> Result<()> {
    let losses = train::train(&args.train_config(), &args.device_config(), args.markers()).await?;
    if let (Some(first), Some(last)) = (losses.first(), losses.last()) {
        info!(first, last, epochs = losses.len(), "training finished");
    }
    Ok(())
}

// ── Compare ───────────────────────────────────────────────────────────────────

async fn run_compare(args: &RunArgs, json: bool) -> Result<()> {
    let cmp = train::compare(
        &args.train_config(),
        &args.pipeline_config(),
        &args.device_config(),
        args.markers(),
    )
    .await?;

    if json {
        let reports = [&cmp.pipelined, &cmp.unsharded];
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!(
        "pipelined  {:>4} shards  {:>10.3} ms  efficiency {:.2}",
        cmp.pipelined.shards, cmp.pipelined.elapsed_ms, cmp.pipelined.timeline_efficiency
    );
    println!(
        "unsharded  {:>4} shards  {:>10.3} ms",
        cmp.unsharded.shards, cmp.unsharded.elapsed_ms
    );
    println!("max |Δ|    {:e}", cmp.max_abs_diff);
    Ok(())
}
