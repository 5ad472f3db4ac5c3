//! Centralized Pegasos baseline: one learner over the whole training set.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use gadget_protocol::{EpochEnv, EpochLoop, Learner, MetricsSink, ShardStore, StepOutcome};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::CentralConfig;
use crate::pegasos::Pegasos;
use crate::summary::{RunMode, RunSummary, StopReason};

pub const RESULTS_FILE: &str = "cent_pegasos_results.csv";

#[derive(Debug)]
pub struct BaselineOutcome {
    pub iterations: u64,
    pub reason: StopReason,
    pub accuracy: f64,
    pub metrics_path: PathBuf,
}

pub fn run(
    cfg: &CentralConfig,
    store: &dyn ShardStore,
    sink: &dyn MetricsSink,
    abort: &AtomicBool,
) -> Result<BaselineOutcome> {
    cfg.validate()?;
    let started_at = Utc::now();

    let read_start = Instant::now();
    let train = store
        .list_shards(&cfg.train_dir)
        .with_context(|| format!("failed to list train shards in {}", cfg.train_dir.display()))?;
    let test = store
        .list_shards(&cfg.test_dir)
        .with_context(|| format!("failed to list test shards in {}", cfg.test_dir.display()))?;
    let read_init_time = read_start.elapsed().as_secs_f64();
    if train.is_empty() {
        bail!("no train shards in {}", cfg.train_dir.display());
    }

    let output_dir = cfg.output_dir();
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let metrics_path = output_dir.join(RESULTS_FILE);

    tracing::info!(
        train = train.len(),
        test = test.len(),
        lambda = cfg.lambda,
        epochs = cfg.epochs,
        dimension = cfg.dimension,
        output = %metrics_path.display(),
        "Centralized baseline started"
    );

    let mut learner = Pegasos::new(cfg.tolerance);
    learner.init(cfg.lambda, cfg.dimension);
    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut epoch = EpochLoop::new(cfg.epochs, None).with_initial_read_time(read_init_time);
    let env = EpochEnv {
        store,
        sink,
        test_shards: &test,
        metrics_path: &metrics_path,
    };

    let mut reason = StopReason::CycleBudget;
    while !epoch.is_finished() {
        if abort.load(Ordering::SeqCst) {
            tracing::warn!(iteration = epoch.iteration(), "Abort requested, stopping");
            reason = StopReason::Aborted;
            break;
        }
        if epoch.step(&mut learner, &train, &env, &mut rng)? == StepOutcome::Converged {
            reason = StopReason::Converged;
        }
    }

    let accuracy = epoch.metrics().accuracy;
    tracing::info!(
        iterations = epoch.iteration(),
        reason = ?reason,
        accuracy = accuracy,
        train_time = epoch.metrics().train_time_secs,
        read_time = epoch.metrics().read_time_secs,
        "🏁 Centralized baseline finished"
    );

    let mut summary = RunSummary::new(RunMode::Centralized, cfg.run, started_at, reason);
    summary.cycles = epoch.iteration();
    summary.network_size = 1;
    summary.nodes_completed = usize::from(epoch.is_finished());
    summary.write(&output_dir)?;

    Ok(BaselineOutcome {
        iterations: epoch.iteration(),
        reason,
        accuracy,
        metrics_path,
    })
}
