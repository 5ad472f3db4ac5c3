use std::io;
use std::path::PathBuf;

use crate::types::{FailState, NodeId};

/// Error type for node lifecycle, training and termination operations.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// A required setting is missing or invalid. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("node {node}: cannot change fail state from {from} to {to}")]
    InvalidStateTransition {
        node: NodeId,
        from: FailState,
        to: FailState,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("shard {path}: {reason}")]
    ShardLoad { path: PathBuf, reason: String },

    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("learner error: {0}")]
    Learner(String),

    #[error("metrics sink: {0}")]
    Metrics(String),

    #[error("iteration {iteration}: {source}")]
    Epoch {
        iteration: u64,
        #[source]
        source: Box<SimError>,
    },

    #[error("node {node}: {source}")]
    Node {
        node: NodeId,
        #[source]
        source: Box<SimError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SimError {
    pub fn shard_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SimError::ShardLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn at_iteration(self, iteration: u64) -> Self {
        SimError::Epoch {
            iteration,
            source: Box::new(self),
        }
    }

    pub(crate) fn on_node(self, node: NodeId) -> Self {
        SimError::Node {
            node,
            source: Box::new(self),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SimError>;
