//! Simulated peers: the read-only node template and the node actor spawned
//! from it.
//!
//! A template is parsed once from configuration. Every [`NodeTemplate::spawn`]
//! draws a fresh id, deep-clones the protocol stack, builds its
//! own learner and binds the node to the shard directory `<resource>/t_<id>`.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::component::ProtocolComponent;
use crate::epoch::{EpochEnv, EpochLoop, StepOutcome};
use crate::error::{Result, SimError};
use crate::learner::{Learner, LearnerFactory};
use crate::shard::{ShardHandle, ShardStore};
use crate::sink::MetricsSink;
use crate::types::{FailState, NodeId, NodeIdentity, NodeMetrics, RunContext, INVALID_INDEX};

/// Monotonic id source. Safe to share between threads.
#[derive(Debug)]
pub struct IdCounter(AtomicI64);

impl IdCounter {
    pub const fn new(start: i64) -> Self {
        Self(AtomicI64::new(start))
    }

    /// Returns the current value and advances the counter.
    pub fn next_id(&self) -> NodeId {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn peek(&self) -> NodeId {
        self.0.load(Ordering::SeqCst)
    }
}

/// Process-wide node ids. Initialized at start-up and never reset, so ids
/// stay unique across runs executed by the same process.
pub static NODE_IDS: IdCounter = IdCounter::new(0);

fn default_lambda() -> f64 {
    0.001
}

fn default_max_iter() -> u64 {
    100_000
}

/// Per-node settings of a decentralized run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Root holding `t_<id>` shard directories and `run<N>` outputs. Required.
    #[serde(default)]
    pub resource_path: Option<PathBuf>,
    /// Held-out shard directory; defaults to `<resource_path>/test`.
    #[serde(default)]
    pub test_path: Option<PathBuf>,
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    /// Epoch budget of every node.
    #[serde(default = "default_max_iter")]
    pub max_iter: u64,
    /// Initial weight dimension; 0 lets the learner grow on demand.
    #[serde(default)]
    pub dim: usize,
    #[serde(default)]
    pub run: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            resource_path: None,
            test_path: None,
            lambda: default_lambda(),
            max_iter: default_max_iter(),
            dim: 0,
            run: 0,
        }
    }
}

/// Read-only prototype every node is spawned from.
pub struct NodeTemplate {
    resource_path: PathBuf,
    test_path: PathBuf,
    lambda: f64,
    epochs: u64,
    dimension: usize,
    run: u32,
    seed: Option<u64>,
    components: Vec<Box<dyn ProtocolComponent>>,
    learner_factory: Arc<LearnerFactory>,
}

impl NodeTemplate {
    /// Validates `config` once; every spawned node shares the result.
    pub fn new(config: &NodeConfig, learner_factory: Arc<LearnerFactory>) -> Result<Self> {
        let resource_path = config
            .resource_path
            .clone()
            .ok_or_else(|| SimError::Configuration("node.resource_path is required".into()))?;
        if config.lambda.is_nan() || config.lambda <= 0.0 {
            return Err(SimError::Configuration(format!(
                "node.lambda must be positive, got {}",
                config.lambda
            )));
        }
        if config.max_iter == 0 {
            return Err(SimError::Configuration("node.max_iter must be at least 1".into()));
        }
        let test_path = config
            .test_path
            .clone()
            .unwrap_or_else(|| resource_path.join("test"));

        tracing::info!(
            resource_path = %resource_path.display(),
            lambda = config.lambda,
            max_iter = config.max_iter,
            run = config.run,
            "Node template ready"
        );

        Ok(Self {
            resource_path,
            test_path,
            lambda: config.lambda,
            epochs: config.max_iter,
            dimension: config.dim,
            run: config.run,
            seed: None,
            components: Vec::new(),
            learner_factory,
        })
    }

    /// Appends a component to the stack cloned into every node.
    pub fn with_component(mut self, component: impl ProtocolComponent + 'static) -> Self {
        self.components.push(Box::new(component));
        self
    }

    /// Base seed for per-node shard sampling; `None` seeds from entropy.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn resource_path(&self) -> &Path {
        &self.resource_path
    }

    pub fn test_path(&self) -> &Path {
        &self.test_path
    }

    /// `<resource>/run<N>`.
    pub fn output_dir(&self) -> PathBuf {
        self.resource_path.join(format!("run{}", self.run))
    }

    pub fn run_context(&self) -> RunContext {
        RunContext {
            run_number: self.run,
            output_directory: self.output_dir(),
            train_shard_directory: self.resource_path.clone(),
            test_shard_directory: self.test_path.clone(),
            lambda: self.lambda,
            dimension: self.dimension,
            epochs: self.epochs,
        }
    }

    /// Spawns a node with the next id from `ids`, normally [`NODE_IDS`].
    pub fn spawn(&self, store: &dyn ShardStore, ids: &IdCounter) -> Result<NodeActor> {
        let id = ids.next_id();
        let started = Instant::now();

        let shard_dir = self.resource_path.join(format!("t_{id}"));
        let shards = store
            .list_shards(&shard_dir)
            .map_err(|e| e.on_node(id))?;
        if shards.is_empty() {
            return Err(SimError::shard_load(&shard_dir, "no shards in node directory").on_node(id));
        }

        let output_dir = self.output_dir();
        fs::create_dir_all(&output_dir).map_err(|e| SimError::from(e).on_node(id))?;

        let mut learner = (self.learner_factory)(self.lambda, self.dimension);
        learner.init(self.lambda, self.dimension);

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ (id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
            None => StdRng::from_entropy(),
        };

        tracing::info!(
            node = id,
            shards = shards.len(),
            dir = %shard_dir.display(),
            "Creating node"
        );

        Ok(NodeActor {
            identity: NodeIdentity { id, index: 0 },
            fail_state: FailState::Up,
            resource_path: self.resource_path.clone(),
            run: self.run,
            metrics_path: output_dir.join(format!("node_{id}.csv")),
            weights_path: output_dir.join(format!("global_{id}.dat")),
            components: self.components.iter().map(|c| c.clone_component()).collect(),
            learner,
            shards,
            epoch: EpochLoop::new(self.epochs, Some(id))
                .with_initial_read_time(started.elapsed().as_secs_f64()),
            rng,
        })
    }
}

impl fmt::Debug for NodeTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTemplate")
            .field("resource_path", &self.resource_path)
            .field("test_path", &self.test_path)
            .field("lambda", &self.lambda)
            .field("epochs", &self.epochs)
            .field("dimension", &self.dimension)
            .field("run", &self.run)
            .field("components", &self.components)
            .finish()
    }
}

/// One simulated peer.
pub struct NodeActor {
    identity: NodeIdentity,
    fail_state: FailState,
    resource_path: PathBuf,
    run: u32,
    metrics_path: PathBuf,
    weights_path: PathBuf,
    components: Vec<Box<dyn ProtocolComponent>>,
    learner: Box<dyn Learner>,
    shards: Vec<ShardHandle>,
    epoch: EpochLoop,
    rng: StdRng,
}

impl NodeActor {
    pub fn id(&self) -> NodeId {
        self.identity.id
    }

    /// Position in the registry, `-1` once dead.
    pub fn index(&self) -> i32 {
        self.identity.index
    }

    /// Moves a live node to a new registry slot. A dead node keeps `-1`.
    pub fn set_index(&mut self, index: i32) {
        if self.fail_state == FailState::Dead {
            tracing::debug!(node = self.identity.id, index = index, "Ignoring index for dead node");
            return;
        }
        self.identity.index = index;
    }

    pub fn identity(&self) -> NodeIdentity {
        self.identity
    }

    pub fn fail_state(&self) -> FailState {
        self.fail_state
    }

    pub fn is_up(&self) -> bool {
        self.fail_state == FailState::Up
    }

    /// Applies a fail-state transition.
    ///
    /// `Dead` is terminal: leaving it is an error, re-entering it is a no-op.
    /// Entering `Dead` invalidates the index and runs every component's
    /// cleanup capability exactly once.
    pub fn set_fail_state(&mut self, state: FailState) -> Result<()> {
        let id = self.identity.id;
        match (self.fail_state, state) {
            (FailState::Dead, FailState::Dead) => Ok(()),
            (FailState::Dead, to) => Err(SimError::InvalidStateTransition {
                node: id,
                from: FailState::Dead,
                to,
            }),
            (_, FailState::Dead) => {
                self.identity.index = INVALID_INDEX;
                self.fail_state = FailState::Dead;
                for component in &mut self.components {
                    if let Some(cleanup) = component.cleanup() {
                        cleanup.on_kill(id);
                    }
                }
                tracing::info!(node = id, "💀 Node is dead");
                Ok(())
            }
            (from, to) => {
                self.fail_state = to;
                if from != to {
                    tracing::info!(node = id, from = %from, to = %to, "Fail state changed");
                }
                Ok(())
            }
        }
    }

    pub fn resource_path(&self) -> &Path {
        &self.resource_path
    }

    pub fn run_number(&self) -> u32 {
        self.run
    }

    pub fn components(&self) -> &[Box<dyn ProtocolComponent>] {
        &self.components
    }

    /// First component of type `T` in the stack.
    pub fn component<T: Any>(&self) -> Option<&T> {
        self.components
            .iter()
            .find_map(|c| c.as_any().downcast_ref::<T>())
    }

    pub fn component_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.components
            .iter_mut()
            .find_map(|c| c.as_any_mut().downcast_mut::<T>())
    }

    pub fn shards(&self) -> &[ShardHandle] {
        &self.shards
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn epoch(&self) -> &EpochLoop {
        &self.epoch
    }

    pub fn metrics(&self) -> &NodeMetrics {
        self.epoch.metrics()
    }

    pub fn training_finished(&self) -> bool {
        self.epoch.is_finished()
    }

    /// Current local weight vector.
    pub fn weights(&self) -> &[f64] {
        self.learner.weights()
    }

    pub fn learner_mut(&mut self) -> &mut dyn Learner {
        self.learner.as_mut()
    }

    /// `<resource>/run<N>/node_<id>.csv`.
    pub fn metrics_path(&self) -> &Path {
        &self.metrics_path
    }

    /// `<resource>/run<N>/global_<id>.dat`.
    pub fn weights_path(&self) -> &Path {
        &self.weights_path
    }

    /// Advances local training by one iteration.
    ///
    /// Returns `None` when the node is not up or has already finished.
    /// When this iteration finishes training, every component is told so.
    pub fn run_cycle(
        &mut self,
        store: &dyn ShardStore,
        sink: &dyn MetricsSink,
        test_shards: &[ShardHandle],
    ) -> Result<Option<StepOutcome>> {
        if !self.is_up() || self.epoch.is_finished() {
            return Ok(None);
        }
        let id = self.identity.id;
        let env = EpochEnv {
            store,
            sink,
            test_shards,
            metrics_path: &self.metrics_path,
        };
        let outcome = self
            .epoch
            .step(self.learner.as_mut(), &self.shards, &env, &mut self.rng)
            .map_err(|e| e.on_node(id))?;

        if outcome.is_finished() {
            tracing::info!(
                node = id,
                outcome = ?outcome,
                iterations = self.epoch.iteration(),
                accuracy = self.epoch.metrics().accuracy,
                "Local training finished"
            );
            for component in &mut self.components {
                component.on_training_complete(id);
            }
        }
        Ok(Some(outcome))
    }

    /// Writes the sparse weight file, propagating the failure.
    pub fn try_write_final_weights(&self) -> Result<PathBuf> {
        let line = encode_sparse(self.learner.weights());
        fs::write(&self.weights_path, line).map_err(|source| SimError::Persist {
            path: self.weights_path.clone(),
            source,
        })?;
        Ok(self.weights_path.clone())
    }

    /// Best-effort variant: a failed write is logged and otherwise ignored.
    pub fn write_final_weights(&self) -> Option<PathBuf> {
        match self.try_write_final_weights() {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(node = self.identity.id, error = %e, "Could not write final weights");
                None
            }
        }
    }
}

impl fmt::Debug for NodeActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeActor")
            .field("id", &self.identity.id)
            .field("index", &self.identity.index)
            .field("fail_state", &self.fail_state)
            .field("shards", &self.shards.len())
            .field("iteration", &self.epoch.iteration())
            .field("components", &self.components)
            .finish()
    }
}

/// `index:value` pairs of the non-zero coefficients, space separated.
pub fn encode_sparse(weights: &[f64]) -> String {
    weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w != 0.0)
        .map(|(i, w)| format!("{i}:{w}"))
        .collect::<Vec<_>>()
        .join(" ")
}
