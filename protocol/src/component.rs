//! Protocol components attached to a node.
//!
//! Every node carries an ordered stack of components cloned from its
//! template. Components may opt into a cleanup capability that runs exactly
//! once when the node dies.

use std::any::Any;
use std::fmt;

use crate::termination::CompletionCounter;
use crate::types::NodeId;

/// Release hook run when the owning node transitions to `Dead`.
pub trait Cleanup {
    fn on_kill(&mut self, node: NodeId);
}

pub trait ProtocolComponent: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Independent deep copy for a newly spawned node.
    fn clone_component(&self) -> Box<dyn ProtocolComponent>;

    /// The owning node finished local training (converged or out of budget).
    fn on_training_complete(&mut self, _node: NodeId) {}

    /// Cleanup capability, if this component has anything to release.
    fn cleanup(&mut self) -> Option<&mut dyn Cleanup> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Clone for Box<dyn ProtocolComponent> {
    fn clone(&self) -> Self {
        self.clone_component()
    }
}

// ─── Completion tracking ──────────────────────────────────────────────

/// Reports its node to the shared completion counter, once.
///
/// A node that dies before finishing is reported by the cleanup hook so the
/// stop predicate is not held back by nodes that will never train again.
#[derive(Debug)]
pub struct CompletionTracker {
    counter: CompletionCounter,
    reported: bool,
}

impl CompletionTracker {
    pub fn new(counter: CompletionCounter) -> Self {
        Self {
            counter,
            reported: false,
        }
    }

    pub fn reported(&self) -> bool {
        self.reported
    }

    fn report(&mut self, node: NodeId, reason: &str) {
        if self.reported {
            return;
        }
        self.reported = true;
        let total = self.counter.increment();
        tracing::debug!(node = node, completed = total, reason = reason, "Node reported complete");
    }
}

impl ProtocolComponent for CompletionTracker {
    fn name(&self) -> &'static str {
        "completion"
    }

    fn clone_component(&self) -> Box<dyn ProtocolComponent> {
        Box::new(CompletionTracker::new(self.counter.clone()))
    }

    fn on_training_complete(&mut self, node: NodeId) {
        self.report(node, "trained");
    }

    fn cleanup(&mut self) -> Option<&mut dyn Cleanup> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Cleanup for CompletionTracker {
    fn on_kill(&mut self, node: NodeId) {
        self.report(node, "killed");
    }
}

// ─── Peer view ────────────────────────────────────────────────────────

/// Bounded neighbour list used by peer exchange.
#[derive(Debug, Clone)]
pub struct PeerView {
    capacity: usize,
    neighbours: Vec<NodeId>,
}

impl PeerView {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            neighbours: Vec::with_capacity(capacity),
        }
    }

    /// Adds a link; false when full or already present.
    pub fn add_neighbour(&mut self, peer: NodeId) -> bool {
        if self.neighbours.len() >= self.capacity || self.neighbours.contains(&peer) {
            return false;
        }
        self.neighbours.push(peer);
        true
    }

    pub fn contains(&self, peer: NodeId) -> bool {
        self.neighbours.contains(&peer)
    }

    pub fn degree(&self) -> usize {
        self.neighbours.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn neighbours(&self) -> &[NodeId] {
        &self.neighbours
    }
}

impl ProtocolComponent for PeerView {
    fn name(&self) -> &'static str {
        "peer_view"
    }

    fn clone_component(&self) -> Box<dyn ProtocolComponent> {
        Box::new(self.clone())
    }

    fn cleanup(&mut self) -> Option<&mut dyn Cleanup> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Cleanup for PeerView {
    fn on_kill(&mut self, node: NodeId) {
        tracing::debug!(node = node, links = self.neighbours.len(), "Dropping peer links");
        self.neighbours.clear();
    }
}
