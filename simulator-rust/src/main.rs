mod centralized;
mod config;
mod metrics;
mod pegasos;
mod scheduler;
mod shards;
mod summary;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::EnvFilter;

use crate::config::{CentralConfig, Overrides, SimConfig};
use crate::metrics::CsvMetricsSink;
use crate::pegasos::DEFAULT_TOLERANCE;
use crate::scheduler::Scheduler;
use crate::shards::DirShardStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "gadget-sim", version, about = "GADGET decentralized Pegasos training simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train one Pegasos learner over a whole shard directory
    Centralized {
        /// Training shard directory
        train_dir: PathBuf,
        /// Held-out shard directory
        test_dir: PathBuf,
        /// Regularization strength
        lambda: f64,
        /// Iteration budget
        epochs: u64,
        /// Run number; output goes to <parent of train_dir>/run<N>
        run: u32,
        /// Initial weight dimension (0 grows on demand)
        dimension: usize,

        /// Seed for shard sampling
        #[arg(long)]
        seed: Option<u64>,

        /// Objective change below which an update counts towards convergence
        #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
        tolerance: f64,
    },

    /// Run a decentralized simulation from a JSON config
    Simulate {
        /// Path to the simulation config
        #[arg(long, env = "GADGET_CONFIG")]
        config: PathBuf,

        /// Override network.size
        #[arg(long)]
        network_size: Option<usize>,

        /// Override network.cycles
        #[arg(long)]
        cycles: Option<u64>,

        /// Override node.run
        #[arg(long)]
        run: Option<u32>,

        /// Override the sampling seed
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    tracing::info!(version = %VERSION, "Starting GADGET simulator");

    // Checked between cycles; the cycle in flight always completes.
    let abort = Arc::new(AtomicBool::new(false));
    let flag = abort.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        flag.store(true, Ordering::SeqCst);
        tracing::warn!("Shutdown requested, finishing the current cycle");
    });

    let task = tokio::task::spawn_blocking(move || execute(cli.command, &abort));
    task.await.context("simulation task panicked")??;

    tracing::info!("Simulator shut down");
    Ok(())
}

fn execute(command: Command, abort: &AtomicBool) -> Result<()> {
    let store = DirShardStore::new();
    let sink = CsvMetricsSink::new();

    match command {
        Command::Centralized {
            train_dir,
            test_dir,
            lambda,
            epochs,
            run,
            dimension,
            seed,
            tolerance,
        } => {
            let cfg = CentralConfig {
                train_dir,
                test_dir,
                lambda,
                epochs,
                run,
                dimension,
                seed,
                tolerance,
            };
            let outcome = centralized::run(&cfg, &store, &sink, abort)?;
            tracing::info!(
                accuracy = outcome.accuracy,
                iterations = outcome.iterations,
                results = %outcome.metrics_path.display(),
                "Baseline results written"
            );
        }
        Command::Simulate {
            config,
            network_size,
            cycles,
            run,
            seed,
        } => {
            let mut sim = SimConfig::load(&config)?;
            sim.apply(&Overrides {
                network_size,
                cycles,
                run,
                seed,
            });
            let outcome = Scheduler::new(&sim, &store, &sink).run(abort)?;
            if !outcome.report.failed.is_empty() {
                tracing::warn!(
                    failed = outcome.report.failed.len(),
                    "Some weight files could not be written"
                );
            }
            tracing::info!(output = %outcome.output_dir.display(), "Run outputs written");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
