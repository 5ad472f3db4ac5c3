//! The epoch-driven training loop shared by the baseline and by every node.
//!
//! Each iteration: sample a shard (with replacement) → one incremental update
//! (skipped once converged) → held-out evaluation every [`EVAL_INTERVAL`]
//! iterations → convergence check → one [`EpochRecord`] to the sink.
//! The loop halts after `epochs` iterations or on convergence, whichever
//! comes first.

use rand::Rng;
use std::path::Path;
use std::time::Instant;

use crate::error::{Result, SimError};
use crate::learner::Learner;
use crate::shard::{ShardHandle, ShardStore};
use crate::sink::MetricsSink;
use crate::types::{EpochRecord, NodeId, NodeMetrics, CONVERGENCE_THRESHOLD, EVAL_INTERVAL};

/// Result of one [`EpochLoop::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// More iterations remain.
    Continue,
    /// The convergence streak reached the threshold.
    Converged,
    /// The epoch budget is spent.
    Exhausted,
}

impl StepOutcome {
    pub fn is_finished(self) -> bool {
        !matches!(self, StepOutcome::Continue)
    }
}

/// Collaborators an iteration reads from and writes to.
#[derive(Clone, Copy)]
pub struct EpochEnv<'a> {
    pub store: &'a dyn ShardStore,
    pub sink: &'a dyn MetricsSink,
    pub test_shards: &'a [ShardHandle],
    pub metrics_path: &'a Path,
}

/// Loop state: iteration cursor, convergence flag and accumulators.
#[derive(Debug, Clone)]
pub struct EpochLoop {
    node: Option<NodeId>,
    epochs: u64,
    iteration: u64,
    converged: bool,
    metrics: NodeMetrics,
}

impl EpochLoop {
    /// `node` is `None` for the centralized baseline.
    pub fn new(epochs: u64, node: Option<NodeId>) -> Self {
        Self {
            node,
            epochs,
            iteration: 0,
            converged: false,
            metrics: NodeMetrics::default(),
        }
    }

    /// Seeds the read-time accumulator with time spent before the first
    /// iteration (listing and opening shards).
    pub fn with_initial_read_time(mut self, secs: f64) -> Self {
        self.metrics.read_time_secs += secs;
        self
    }

    /// Iterations completed so far.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn epochs(&self) -> u64 {
        self.epochs
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    pub fn is_finished(&self) -> bool {
        self.converged || self.iteration >= self.epochs
    }

    fn outcome(&self) -> StepOutcome {
        if self.converged {
            StepOutcome::Converged
        } else if self.iteration >= self.epochs {
            StepOutcome::Exhausted
        } else {
            StepOutcome::Continue
        }
    }

    /// Runs one iteration. A finished loop is left untouched.
    ///
    /// Any shard, learner or sink failure is returned tagged with the
    /// iteration; the loop state is not advanced in that case.
    pub fn step<R: Rng + ?Sized>(
        &mut self,
        learner: &mut dyn Learner,
        shards: &[ShardHandle],
        env: &EpochEnv<'_>,
        rng: &mut R,
    ) -> Result<StepOutcome> {
        if self.is_finished() {
            return Ok(self.outcome());
        }
        let iteration = self.iteration;
        self.iterate(iteration, learner, shards, env, rng)
            .map_err(|e| e.at_iteration(iteration))?;
        self.iteration += 1;
        Ok(self.outcome())
    }

    /// Drives the loop until it converges or spends its budget.
    pub fn run<R: Rng + ?Sized>(
        &mut self,
        learner: &mut dyn Learner,
        shards: &[ShardHandle],
        env: &EpochEnv<'_>,
        rng: &mut R,
    ) -> Result<StepOutcome> {
        loop {
            let outcome = self.step(learner, shards, env, rng)?;
            if outcome.is_finished() {
                return Ok(outcome);
            }
        }
    }

    fn iterate<R: Rng + ?Sized>(
        &mut self,
        iteration: u64,
        learner: &mut dyn Learner,
        shards: &[ShardHandle],
        env: &EpochEnv<'_>,
        rng: &mut R,
    ) -> Result<()> {
        if shards.is_empty() {
            return Err(SimError::Configuration(
                "no training shards available".into(),
            ));
        }

        // With replacement: repeats are expected, order means nothing.
        let pick = rng.gen_range(0..shards.len());
        let started = Instant::now();
        let example = env.store.load_by_index(shards, pick)?;
        self.metrics.read_time_secs += started.elapsed().as_secs_f64();

        if self.metrics.converged_streak < CONVERGENCE_THRESHOLD {
            learner.set_step_counter(iteration + 2);
            let started = Instant::now();
            let stats = learner.update(&example)?;
            self.metrics.train_time_secs += started.elapsed().as_secs_f64();
            self.metrics.absorb(&stats);
        }

        if iteration % EVAL_INTERVAL == 0 {
            self.metrics.accuracy = evaluate_accuracy(&*learner, env.store, env.test_shards)?;
        }

        if self.metrics.converged_streak >= CONVERGENCE_THRESHOLD && !self.converged {
            self.converged = true;
            tracing::info!(
                node = ?self.node,
                iteration = iteration,
                accuracy = self.metrics.accuracy,
                "Training converged"
            );
        }

        let record = self.record(iteration, learner.step_counter());
        tracing::debug!(
            node = ?self.node,
            iteration = iteration,
            shard = %shards[pick],
            objective = record.objective,
            streak = record.converged_streak,
            "Epoch complete"
        );
        env.sink.append_row(env.metrics_path, &record)
    }

    fn record(&self, iteration: u64, step_counter: u64) -> EpochRecord {
        let m = &self.metrics;
        EpochRecord {
            node: self.node,
            iteration,
            objective: m.objective,
            loss: m.loss,
            weight_norm: m.weight_norm,
            objective_delta: m.objective_delta,
            converged: self.converged,
            converged_streak: m.converged_streak,
            accuracy: m.accuracy,
            zero_one_error: 1.0 - m.accuracy,
            train_time: m.train_time_secs,
            read_time: m.read_time_secs,
            step_counter,
        }
    }
}

/// Fraction of test shards whose first example `learner` classifies correctly.
pub fn evaluate_accuracy(
    learner: &dyn Learner,
    store: &dyn ShardStore,
    test_shards: &[ShardHandle],
) -> Result<f64> {
    if test_shards.is_empty() {
        return Err(SimError::Configuration(
            "test shard directory is empty".into(),
        ));
    }
    let mut correct = 0usize;
    for shard in test_shards {
        let example = store.load_first_example(shard)?;
        if learner.classify(&example) == example.label {
            correct += 1;
        }
    }
    Ok(correct as f64 / test_shards.len() as f64)
}
