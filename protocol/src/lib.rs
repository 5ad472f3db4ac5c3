//! GADGET decentralized learning core
//!
//! A population of simulated peers, each with a private shard directory,
//! trains a linear classifier incrementally until the whole population has
//! finished. The same epoch loop also drives a centralized baseline.
//!
//! # Architecture
//!
//! ```text
//!   NodeTemplate ──spawn──► NodeActor ──┐   (one per peer, in the Network)
//!                              │        │
//!                   ┌──────────┼────────┘
//!                   ▼          ▼
//!              ShardStore   Learner        EpochLoop: sample → update →
//!                   │          │           evaluate (every 5th) → converge? → emit
//!                   └────► MetricsSink
//!
//!   each cycle:  every Up node steps once ─► StopPredicate ─► … ─► finalize
//! ```
//!
//! ## Fail states
//! - `Up` nodes train; `Down` nodes are skipped but keep their state
//! - `Dead` is terminal: the index becomes `-1` and cleanup hooks run once
//!
//! ## Termination
//! - Completion is counted by the `CompletionTracker` protocol component
//! - The stop predicate fires when every node has completed
//! - Finalize writes every node's weights exactly once, dead nodes included

pub mod component;
pub mod epoch;
pub mod error;
pub mod learner;
pub mod network;
pub mod node;
pub mod shard;
pub mod sink;
pub mod termination;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use component::{Cleanup, CompletionTracker, PeerView, ProtocolComponent};
pub use epoch::{evaluate_accuracy, EpochEnv, EpochLoop, StepOutcome};
pub use error::{Result, SimError};
pub use learner::{Learner, LearnerFactory};
pub use network::Network;
pub use node::{encode_sparse, IdCounter, NodeActor, NodeConfig, NodeTemplate, NODE_IDS};
pub use shard::{ShardHandle, ShardStore};
pub use sink::{MetricsSink, BASELINE_HEADER};
pub use termination::{
    CompletionCounter, FinalizeReport, StopPredicate, Termination, TerminationState,
};
pub use types::*;
