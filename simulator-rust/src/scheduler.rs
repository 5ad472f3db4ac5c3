//! Cycle-driven driver of a decentralized run.
//!
//! ```text
//!  spawn nodes → wire peers → [abort? → faults → step Up nodes ∥ → stop?]* → finalize → summary
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use gadget_protocol::{
    CompletionCounter, CompletionTracker, FinalizeReport, IdCounter, MetricsSink, Network, NodeId,
    NodeTemplate, PeerView, ShardStore, SimError, StopPredicate, Termination, NODE_IDS,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::config::SimConfig;
use crate::pegasos::Pegasos;
use crate::summary::{RunMode, RunSummary, StopReason};

#[derive(Debug)]
pub struct SimulationOutcome {
    pub cycles: u64,
    pub reason: StopReason,
    pub network_size: usize,
    pub completed: usize,
    pub dead: usize,
    pub report: FinalizeReport,
    pub output_dir: PathBuf,
}

pub struct Scheduler<'a> {
    config: &'a SimConfig,
    store: &'a dyn ShardStore,
    sink: &'a dyn MetricsSink,
    ids: &'a IdCounter,
}

impl<'a> Scheduler<'a> {
    pub fn new(config: &'a SimConfig, store: &'a dyn ShardStore, sink: &'a dyn MetricsSink) -> Self {
        Self {
            config,
            store,
            sink,
            ids: &NODE_IDS,
        }
    }

    /// Draws node ids from `ids` instead of the process-wide counter.
    pub fn with_ids(mut self, ids: &'a IdCounter) -> Self {
        self.ids = ids;
        self
    }

    /// Runs the simulation to completion, cycle budget or abort.
    ///
    /// `abort` is only looked at between cycles; a cycle in progress always
    /// completes. Finalize and the summary run on every non-error exit.
    pub fn run(&self, abort: &AtomicBool) -> Result<SimulationOutcome> {
        let config = self.config;
        config.validate()?;
        let started_at = Utc::now();

        let counter = CompletionCounter::new();
        let template = NodeTemplate::new(&config.node, Pegasos::factory(config.convergence_tolerance))?
            .with_seed(config.seed)
            .with_component(CompletionTracker::new(counter.clone()))
            .with_component(PeerView::new(config.network.degree));

        let test_shards = self
            .store
            .list_shards(template.test_path())
            .context("failed to list test shards")?;
        if test_shards.is_empty() {
            bail!("no test shards in {}", template.test_path().display());
        }

        let mut network = Network::populate(&template, self.store, config.network.size, self.ids)?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        wire_peers(&mut network, config.network.degree, &mut rng);

        let mut termination = Termination::new(StopPredicate::new(network.len(), counter));
        tracing::info!(
            size = network.len(),
            cycles = config.network.cycles,
            faults = config.faults.len(),
            "🚀 Simulation started"
        );

        let mut reason = StopReason::CycleBudget;
        let mut cycles = 0;
        for cycle in 0..config.network.cycles {
            if abort.load(Ordering::SeqCst) {
                tracing::warn!(cycle = cycle, "Abort requested, stopping");
                reason = StopReason::Aborted;
                break;
            }

            for fault in config.faults_at(cycle) {
                network
                    .set_fail_state(fault.node, fault.state)
                    .with_context(|| format!("fault at cycle {cycle} on node slot {}", fault.node))?;
                tracing::info!(cycle = cycle, slot = fault.node, state = %fault.state, "Fault applied");
            }

            let (store, sink, tests) = (self.store, self.sink, &test_shards);
            let stepped = network
                .nodes_mut()
                .par_iter_mut()
                .map(|node| node.run_cycle(store, sink, tests))
                .collect::<std::result::Result<Vec<_>, SimError>>()
                .with_context(|| format!("cycle {cycle} failed"))?
                .into_iter()
                .flatten()
                .count();

            cycles = cycle + 1;
            tracing::debug!(
                cycle = cycle,
                stepped = stepped,
                completed = termination.predicate().completed(),
                "Cycle done"
            );

            if termination.observe() {
                reason = StopReason::Converged;
                break;
            }
        }

        let completed = termination.predicate().completed();
        let report = termination.finalize(&network).unwrap_or_default();
        let outcome = SimulationOutcome {
            cycles,
            reason,
            network_size: network.len(),
            completed,
            dead: network.dead_count(),
            report,
            output_dir: template.output_dir(),
        };

        let mut summary = RunSummary::new(RunMode::Decentralized, config.node.run, started_at, reason);
        summary.cycles = outcome.cycles;
        summary.network_size = outcome.network_size;
        summary.nodes_completed = outcome.completed;
        summary.nodes_dead = outcome.dead;
        summary.weights_written = outcome.report.written.len();
        summary.weights_failed = outcome.report.failed.iter().map(|(id, _)| *id).collect();
        summary.write(&outcome.output_dir)?;

        tracing::info!(
            cycles = outcome.cycles,
            reason = ?outcome.reason,
            completed = outcome.completed,
            dead = outcome.dead,
            "✅ Simulation finished"
        );
        Ok(outcome)
    }
}

/// k-out random wiring: every node links to up to `degree` distinct others.
fn wire_peers(network: &mut Network, degree: usize, rng: &mut StdRng) {
    if degree == 0 {
        return;
    }
    let ids: Vec<NodeId> = network.iter().map(|n| n.id()).collect();
    for node in network.nodes_mut() {
        let own = node.id();
        let mut candidates: Vec<NodeId> = ids.iter().copied().filter(|&id| id != own).collect();
        candidates.shuffle(rng);
        if let Some(view) = node.component_mut::<PeerView>() {
            for peer in candidates.into_iter().take(degree) {
                view.add_neighbour(peer);
            }
        }
    }
}
