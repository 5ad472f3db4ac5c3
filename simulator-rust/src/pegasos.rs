//! Pegasos: primal estimated sub-gradient solver for linear SVMs.
//!
//! Reference: Shalev-Shwartz, Singer, Srebro, "Pegasos: Primal Estimated
//! sub-GrAdient SOlver for SVM" (ICML 2007). One example per step, with the
//! optional projection onto the ball of radius `1/sqrt(lambda)`.

use gadget_protocol::{Example, Learner, LearnerFactory, SimError, UpdateStats, MAX_FEATURE_INDEX};
use std::sync::Arc;

/// Objective change below which a step counts towards the convergence streak.
pub const DEFAULT_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone)]
pub struct Pegasos {
    lambda: f64,
    weights: Vec<f64>,
    t: u64,
    prev_objective: Option<f64>,
    streak: u32,
    tolerance: f64,
}

impl Pegasos {
    pub fn new(tolerance: f64) -> Self {
        Pegasos {
            lambda: 0.001,
            weights: Vec::new(),
            t: 1,
            prev_objective: None,
            streak: 0,
            tolerance,
        }
    }

    /// Factory handed to the node template: one learner per node. The
    /// template calls [`Learner::init`] on what it gets back.
    pub fn factory(tolerance: f64) -> Arc<LearnerFactory> {
        Arc::new(move |_, _| Box::new(Pegasos::new(tolerance)) as Box<dyn Learner>)
    }

    fn dot(&self, example: &Example) -> f64 {
        example
            .features
            .iter()
            .map(|&(i, v)| self.weights.get(i).copied().unwrap_or(0.0) * v)
            .sum()
    }

    fn norm_sq(&self) -> f64 {
        self.weights.iter().map(|w| w * w).sum()
    }
}

impl Learner for Pegasos {
    fn init(&mut self, lambda: f64, dimension: usize) {
        self.lambda = lambda;
        self.weights = vec![0.0; dimension];
        self.t = 1;
        self.prev_objective = None;
        self.streak = 0;
    }

    fn update(&mut self, example: &Example) -> Result<UpdateStats, SimError> {
        let span = example.span();
        if span > MAX_FEATURE_INDEX + 1 {
            return Err(SimError::Learner(format!(
                "feature index {} out of range",
                span - 1
            )));
        }
        if self.weights.len() < span {
            self.weights.resize(span, 0.0);
        }

        let t = self.t.max(1) as f64;
        let eta = 1.0 / (self.lambda * t);
        let margin = example.label * self.dot(example);

        // w <- (1 - eta*lambda) w [+ eta*y*x on a margin violation]
        let shrink = 1.0 - eta * self.lambda;
        for w in &mut self.weights {
            *w *= shrink;
        }
        if margin < 1.0 {
            for &(i, v) in &example.features {
                self.weights[i] += eta * example.label * v;
            }
        }

        let radius = 1.0 / self.lambda.sqrt();
        let norm = self.norm_sq().sqrt();
        if norm > radius {
            let scale = radius / norm;
            for w in &mut self.weights {
                *w *= scale;
            }
        }

        let norm_sq = self.norm_sq();
        let loss = (1.0 - example.label * self.dot(example)).max(0.0);
        let objective = 0.5 * self.lambda * norm_sq + loss;
        if !objective.is_finite() {
            return Err(SimError::Learner(format!(
                "objective diverged at step {}",
                self.t
            )));
        }

        let delta = match self.prev_objective {
            Some(prev) => (objective - prev).abs(),
            None => objective,
        };
        if delta < self.tolerance {
            self.streak += 1;
        } else {
            self.streak = 0;
        }
        self.prev_objective = Some(objective);

        Ok(UpdateStats {
            objective,
            loss,
            weight_norm: norm_sq.sqrt(),
            objective_delta: delta,
            converged_streak: self.streak,
        })
    }

    fn classify(&self, example: &Example) -> f64 {
        if self.dot(example) >= 0.0 {
            1.0
        } else {
            -1.0
        }
    }

    fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn step_counter(&self) -> u64 {
        self.t
    }

    fn set_step_counter(&mut self, t: u64) {
        self.t = t;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_data() -> Vec<Example> {
        vec![
            Example::new(1.0, vec![(0, 2.0), (1, 1.0)]),
            Example::new(1.0, vec![(0, 1.5), (1, 2.0)]),
            Example::new(-1.0, vec![(0, -2.0), (1, -1.0)]),
            Example::new(-1.0, vec![(0, -1.0), (1, -2.5)]),
        ]
    }

    #[test]
    fn test_learns_separable_data() {
        let data = toy_data();
        let mut p = Pegasos::new(DEFAULT_TOLERANCE);
        p.init(0.01, 2);
        for step in 0..400u64 {
            p.set_step_counter(step + 2);
            p.update(&data[(step % 4) as usize]).unwrap();
        }
        for ex in &data {
            assert_eq!(p.classify(ex), ex.label);
        }
    }

    #[test]
    fn test_projection_bounds_norm() {
        let mut p = Pegasos::new(DEFAULT_TOLERANCE);
        p.init(0.5, 1);
        p.set_step_counter(1);
        let stats = p.update(&Example::new(1.0, vec![(0, 100.0)])).unwrap();
        assert!(stats.weight_norm <= 1.0 / 0.5f64.sqrt() + 1e-9);
    }

    #[test]
    fn test_weights_grow_on_demand() {
        let mut p = Pegasos::new(DEFAULT_TOLERANCE);
        p.init(0.1, 0);
        p.update(&Example::new(-1.0, vec![(6, 1.0)])).unwrap();
        assert_eq!(p.weights().len(), 7);
        assert!(p.weights()[6] < 0.0);
    }

    #[test]
    fn test_out_of_range_feature_is_an_error() {
        let mut p = Pegasos::new(DEFAULT_TOLERANCE);
        p.init(0.1, 0);
        let err = p.update(&Example::new(1.0, vec![(usize::MAX, 1.0)])).unwrap_err();
        assert!(matches!(err, SimError::Learner(_)));
        assert!(p.weights().is_empty());
    }

    #[test]
    fn test_streak_builds_on_stable_objective_and_resets() {
        let ex = Example::new(1.0, vec![(0, 1.0)]);
        let mut p = Pegasos::new(DEFAULT_TOLERANCE);
        p.init(0.01, 1);
        let mut last = UpdateStats::default();
        for step in 0..200u64 {
            p.set_step_counter(step + 2);
            last = p.update(&ex).unwrap();
        }
        assert!(last.converged_streak >= 10, "streak={}", last.converged_streak);

        // A contradicting example moves the objective and resets the streak.
        p.set_step_counter(3);
        let stats = p.update(&Example::new(-1.0, vec![(0, 5.0)])).unwrap();
        assert_eq!(stats.converged_streak, 0);
    }

    #[test]
    fn test_factory_builds_independent_learners() {
        let factory = Pegasos::factory(DEFAULT_TOLERANCE);
        let mut a = factory(0.1, 3);
        let mut b = factory(0.1, 3);
        a.init(0.1, 3);
        b.init(0.1, 3);
        a.update(&Example::new(1.0, vec![(0, 1.0)])).unwrap();
        assert!(a.weights()[0] != 0.0);
        assert!(b.weights().iter().all(|w| *w == 0.0));
    }
}
