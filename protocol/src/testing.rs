//! In-memory doubles for the learner, shard store and metrics sink.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, SimError};
use crate::learner::Learner;
use crate::shard::{ShardHandle, ShardStore};
use crate::sink::MetricsSink;
use crate::types::{EpochRecord, Example, UpdateStats};

/// Learner whose streak grows by a fixed step per update.
#[derive(Debug, Default)]
pub struct ScriptedLearner {
    weights: Vec<f64>,
    t: u64,
    streak: u32,
    streak_step: u32,
    updates: usize,
    objective: f64,
}

impl ScriptedLearner {
    pub fn never_converging() -> Self {
        Self::default()
    }

    /// Streak reaches the convergence threshold on the tenth update.
    pub fn streaking() -> Self {
        Self {
            streak_step: 1,
            ..Self::default()
        }
    }

    pub fn updates(&self) -> usize {
        self.updates
    }

    pub fn set_weights(&mut self, weights: Vec<f64>) {
        self.weights = weights;
    }
}

impl Learner for ScriptedLearner {
    fn init(&mut self, _lambda: f64, dimension: usize) {
        self.weights = vec![0.0; dimension];
        self.streak = 0;
        self.updates = 0;
    }

    fn update(&mut self, example: &Example) -> Result<UpdateStats> {
        self.updates += 1;
        self.streak += self.streak_step;
        if self.weights.len() < example.span() {
            self.weights.resize(example.span(), 0.0);
        }
        for &(i, v) in &example.features {
            self.weights[i] += 0.1 * example.label * v;
        }
        let objective = 1.0 / self.updates as f64;
        let delta = (objective - self.objective).abs();
        self.objective = objective;
        Ok(UpdateStats {
            objective,
            loss: 0.5,
            weight_norm: self.weights.iter().map(|w| w * w).sum::<f64>().sqrt(),
            objective_delta: delta,
            converged_streak: self.streak,
        })
    }

    fn classify(&self, example: &Example) -> f64 {
        let dot: f64 = example
            .features
            .iter()
            .map(|&(i, v)| self.weights.get(i).copied().unwrap_or(0.0) * v)
            .sum();
        if dot >= 0.0 {
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

/// Shard store backed by maps; counts loads per shard.
#[derive(Debug, Default)]
pub struct MemoryStore {
    dirs: HashMap<PathBuf, Vec<ShardHandle>>,
    examples: HashMap<PathBuf, Example>,
    loads: Mutex<HashMap<PathBuf, usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        dir: impl AsRef<Path>,
        name: &str,
        example: Example,
    ) -> ShardHandle {
        let path = dir.as_ref().join(name);
        let handle = ShardHandle::new(&path);
        let shards = self.dirs.entry(dir.as_ref().to_path_buf()).or_default();
        shards.push(handle.clone());
        shards.sort();
        self.examples.insert(path, example);
        handle
    }

    pub fn loads(&self, shard: &ShardHandle) -> usize {
        let loads = self.loads.lock().unwrap();
        loads.get(shard.path()).copied().unwrap_or(0)
    }
}

impl ShardStore for MemoryStore {
    fn list_shards(&self, dir: &Path) -> Result<Vec<ShardHandle>> {
        self.dirs
            .get(dir)
            .cloned()
            .ok_or_else(|| SimError::shard_load(dir, "no such directory"))
    }

    fn load_first_example(&self, shard: &ShardHandle) -> Result<Example> {
        let example = self
            .examples
            .get(shard.path())
            .cloned()
            .ok_or_else(|| SimError::shard_load(shard.path(), "not found"))?;
        *self
            .loads
            .lock()
            .unwrap()
            .entry(shard.path().to_path_buf())
            .or_default() += 1;
        Ok(example)
    }
}

/// Sink that keeps every row in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    rows: Mutex<Vec<(PathBuf, EpochRecord)>>,
}

impl RecordingSink {
    pub fn records(&self, path: &Path) -> Vec<EpochRecord> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

impl MetricsSink for RecordingSink {
    fn append_row(&self, path: &Path, record: &EpochRecord) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .push((path.to_path_buf(), record.clone()));
        Ok(())
    }
}
