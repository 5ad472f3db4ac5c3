//! The incremental classifier seam.
//!
//! The core never looks inside a learner: it feeds examples, reads back the
//! [`UpdateStats`] signals, classifies held-out examples and, at the end,
//! copies out the weight vector.

use crate::error::Result;
use crate::types::{Example, UpdateStats};

pub trait Learner: Send {
    /// Reset to an untrained model with regularization `lambda` and an
    /// initial weight dimension.
    fn init(&mut self, lambda: f64, dimension: usize);

    /// One incremental step on a single example.
    fn update(&mut self, example: &Example) -> Result<UpdateStats>;

    /// Predicted label, `+1.0` or `-1.0`.
    fn classify(&self, example: &Example) -> f64;

    fn weights(&self) -> &[f64];

    /// Step counter seeding the learner's decay schedule.
    fn step_counter(&self) -> u64;

    fn set_step_counter(&mut self, t: u64);
}

/// Builds a fresh learner for each spawned node from `(lambda, dimension)`.
pub type LearnerFactory = dyn Fn(f64, usize) -> Box<dyn Learner> + Send + Sync;
