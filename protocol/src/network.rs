use crate::error::{Result, SimError};
use crate::node::{IdCounter, NodeActor, NodeTemplate};
use crate::shard::ShardStore;
use crate::types::{FailState, NodeId};

/// The node registry. Owns every node for the whole run; dead nodes keep
/// their slot.
#[derive(Debug, Default)]
pub struct Network {
    nodes: Vec<NodeActor>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `size` nodes from `template` in id order, drawing ids from
    /// `ids` (usually [`crate::NODE_IDS`]).
    pub fn populate(
        template: &NodeTemplate,
        store: &dyn ShardStore,
        size: usize,
        ids: &IdCounter,
    ) -> Result<Self> {
        let mut network = Network {
            nodes: Vec::with_capacity(size),
        };
        for _ in 0..size {
            network.add(template.spawn(store, ids)?);
        }
        tracing::info!(size = size, "🌱 Network populated");
        Ok(network)
    }

    /// Appends a node and assigns its index.
    pub fn add(&mut self, mut node: NodeActor) -> usize {
        let index = self.nodes.len();
        node.set_index(index as i32);
        self.nodes.push(node);
        index
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NodeActor> {
        self.nodes.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut NodeActor> {
        self.nodes.get_mut(index)
    }

    pub fn find(&self, id: NodeId) -> Option<&NodeActor> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    /// Nodes in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeActor> {
        self.nodes.iter()
    }

    pub fn nodes_mut(&mut self) -> &mut [NodeActor] {
        &mut self.nodes
    }

    /// Applies a fail-state change to the node in registry slot `slot`.
    pub fn set_fail_state(&mut self, slot: usize, state: FailState) -> Result<()> {
        let len = self.nodes.len();
        let node = self.nodes.get_mut(slot).ok_or_else(|| {
            SimError::InvalidArgument(format!("node slot {slot} out of range ({len} nodes)"))
        })?;
        node.set_fail_state(state)
    }

    pub fn up_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_up()).count()
    }

    pub fn dead_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.fail_state() == FailState::Dead)
            .count()
    }
}
