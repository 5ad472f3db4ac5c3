//! Network-wide termination: a per-cycle stop predicate and the one-time
//! finalize pass that flushes every node's weights.
//!
//! ```text
//!  Running ──(stop predicate true / driver stops)──► Finalizing ──► Terminated
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::network::Network;
use crate::types::NodeId;

/// Shared count of nodes that finished local training.
#[derive(Debug, Clone, Default)]
pub struct CompletionCounter(Arc<AtomicUsize>);

impl CompletionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one completed node; returns the new total.
    pub fn increment(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fires once every node of the network has reported completion.
#[derive(Debug, Clone)]
pub struct StopPredicate {
    network_size: usize,
    completed: CompletionCounter,
}

impl StopPredicate {
    pub fn new(network_size: usize, completed: CompletionCounter) -> Self {
        Self {
            network_size,
            completed,
        }
    }

    /// Pure read of the counter; safe to call every cycle.
    pub fn should_stop(&self) -> bool {
        self.completed.get() == self.network_size
    }

    pub fn completed(&self) -> usize {
        self.completed.get()
    }

    pub fn network_size(&self) -> usize {
        self.network_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationState {
    Running,
    Finalizing,
    Terminated,
}

/// What the finalize pass wrote and what it could not write.
#[derive(Debug, Default)]
pub struct FinalizeReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(NodeId, String)>,
}

impl FinalizeReport {
    pub fn visited(&self) -> usize {
        self.written.len() + self.failed.len()
    }
}

#[derive(Debug)]
pub struct Termination {
    predicate: StopPredicate,
    state: TerminationState,
}

impl Termination {
    pub fn new(predicate: StopPredicate) -> Self {
        Self {
            predicate,
            state: TerminationState::Running,
        }
    }

    pub fn state(&self) -> TerminationState {
        self.state
    }

    pub fn predicate(&self) -> &StopPredicate {
        &self.predicate
    }

    /// Called after every cycle. True means the driver should stop cycling.
    pub fn observe(&mut self) -> bool {
        match self.state {
            TerminationState::Running => {
                if self.predicate.should_stop() {
                    tracing::info!(
                        completed = self.predicate.completed(),
                        size = self.predicate.network_size(),
                        "All nodes completed, stopping"
                    );
                    self.state = TerminationState::Finalizing;
                    true
                } else {
                    false
                }
            }
            TerminationState::Finalizing | TerminationState::Terminated => true,
        }
    }

    /// Writes every node's final weights, in registry order and regardless of
    /// fail state. Runs once; later calls return `None`.
    ///
    /// A node whose file cannot be written is reported in
    /// [`FinalizeReport::failed`] and does not stop the others.
    pub fn finalize(&mut self, network: &Network) -> Option<FinalizeReport> {
        if self.state == TerminationState::Terminated {
            tracing::warn!("Finalize requested again, ignoring");
            return None;
        }
        self.state = TerminationState::Finalizing;
        tracing::info!(nodes = network.len(), "Running final control");

        let mut report = FinalizeReport::default();
        for node in network.iter() {
            match node.try_write_final_weights() {
                Ok(path) => {
                    tracing::info!(
                        node = node.id(),
                        state = %node.fail_state(),
                        path = %path.display(),
                        "Global weights written"
                    );
                    report.written.push(path);
                }
                Err(e) => {
                    tracing::warn!(node = node.id(), error = %e, "Failed to write global weights");
                    report.failed.push((node.id(), e.to_string()));
                }
            }
        }

        self.state = TerminationState::Terminated;
        Some(report)
    }
}
