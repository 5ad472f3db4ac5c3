use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::SimError;

/// Process-unique node identifier, drawn from a monotonic counter.
pub type NodeId = i64;

/// Index value of a node that is no longer part of the live network.
pub const INVALID_INDEX: i32 = -1;

/// Consecutive qualifying updates after which training counts as converged.
pub const CONVERGENCE_THRESHOLD: u32 = 10;

/// Held-out accuracy is recomputed on every iteration divisible by this.
pub const EVAL_INTERVAL: u64 = 5;

/// Largest accepted zero-based feature index. Weight vectors are dense, so
/// anything past this is treated as a corrupt shard rather than allocated.
pub const MAX_FEATURE_INDEX: usize = (1 << 24) - 1;

/// Participation status of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailState {
    /// Active: trains, evaluates and emits metrics.
    #[default]
    #[serde(alias = "ok")]
    Up,
    /// Suspended: keeps its state and index, skipped by the scheduler.
    Down,
    /// Terminal. The node keeps its registry slot but never runs again.
    Dead,
}

impl fmt::Display for FailState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailState::Up => write!(f, "up"),
            FailState::Down => write!(f, "down"),
            FailState::Dead => write!(f, "dead"),
        }
    }
}

impl FromStr for FailState {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "ok" => Ok(FailState::Up),
            "down" => Ok(FailState::Down),
            "dead" => Ok(FailState::Dead),
            other => Err(SimError::InvalidArgument(format!("failState={other}"))),
        }
    }
}

/// Numeric codes as used by the classic cycle-driven simulators:
/// 0 = OK, 1 = DEAD, 2 = DOWN.
impl TryFrom<i32> for FailState {
    type Error = SimError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(FailState::Up),
            1 => Ok(FailState::Dead),
            2 => Ok(FailState::Down),
            other => Err(SimError::InvalidArgument(format!("failState={other}"))),
        }
    }
}

/// Identity of a node: a permanent id plus its current registry position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeIdentity {
    pub id: NodeId,
    pub index: i32,
}

/// A single labelled example with sparse features.
///
/// Feature indices are zero-based; labels are normalized to `+1.0` / `-1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub label: f64,
    pub features: Vec<(usize, f64)>,
}

impl Example {
    pub fn new(label: f64, features: Vec<(usize, f64)>) -> Self {
        Self {
            label: if label > 0.0 { 1.0 } else { -1.0 },
            features,
        }
    }

    /// Largest feature index plus one, i.e. the dimension needed to hold it.
    pub fn span(&self) -> usize {
        self.features
            .iter()
            .map(|(i, _)| i.saturating_add(1))
            .max()
            .unwrap_or(0)
    }
}

/// What a learner reports after one incremental update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdateStats {
    pub objective: f64,
    pub loss: f64,
    pub weight_norm: f64,
    pub objective_delta: f64,
    /// Opaque streak signal; compared against [`CONVERGENCE_THRESHOLD`].
    pub converged_streak: u32,
}

/// Local training accumulators of one node or of the centralized baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeMetrics {
    pub objective: f64,
    pub loss: f64,
    pub weight_norm: f64,
    pub objective_delta: f64,
    pub converged_streak: u32,
    pub accuracy: f64,
    pub train_time_secs: f64,
    pub read_time_secs: f64,
}

impl NodeMetrics {
    pub(crate) fn absorb(&mut self, stats: &UpdateStats) {
        self.objective = stats.objective;
        self.loss = stats.loss;
        self.weight_norm = stats.weight_norm;
        self.objective_delta = stats.objective_delta;
        self.converged_streak = stats.converged_streak;
    }
}

/// One emitted metrics row. Never mutated once handed to a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochRecord {
    /// `None` for the centralized baseline.
    pub node: Option<NodeId>,
    pub iteration: u64,
    pub objective: f64,
    pub loss: f64,
    pub weight_norm: f64,
    pub objective_delta: f64,
    pub converged: bool,
    pub converged_streak: u32,
    pub accuracy: f64,
    pub zero_one_error: f64,
    pub train_time: f64,
    pub read_time: f64,
    pub step_counter: u64,
}

/// Read-only parameters of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub run_number: u32,
    pub output_directory: PathBuf,
    pub train_shard_directory: PathBuf,
    pub test_shard_directory: PathBuf,
    pub lambda: f64,
    pub dimension: usize,
    pub epochs: u64,
}
