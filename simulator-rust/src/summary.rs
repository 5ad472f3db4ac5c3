use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use gadget_protocol::NodeId;
use serde::Serialize;
use uuid::Uuid;

pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Decentralized,
    Centralized,
}

/// Why a run stopped cycling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every node finished local training.
    Converged,
    /// The cycle (or epoch) budget ran out first.
    CycleBudget,
    /// Shutdown was requested between cycles.
    Aborted,
}

/// One `summary.json` per run directory.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub run: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cycles: u64,
    pub stop_reason: StopReason,
    pub network_size: usize,
    pub nodes_completed: usize,
    pub nodes_dead: usize,
    pub weights_written: usize,
    pub weights_failed: Vec<NodeId>,
}

impl RunSummary {
    pub fn new(mode: RunMode, run: u32, started_at: DateTime<Utc>, stop_reason: StopReason) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            run,
            started_at,
            finished_at: Utc::now(),
            cycles: 0,
            stop_reason,
            network_size: 0,
            nodes_completed: 0,
            nodes_dead: 0,
            weights_written: 0,
            weights_failed: Vec::new(),
        }
    }

    /// Writes `<dir>/summary.json`, replacing any previous one.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(SUMMARY_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write run summary {}", path.display()))?;
        tracing::info!(run_id = %self.run_id, path = %path.display(), "Run summary written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut summary = RunSummary::new(RunMode::Decentralized, 4, Utc::now(), StopReason::CycleBudget);
        summary.cycles = 12;
        summary.network_size = 3;
        summary.weights_failed = vec![2];

        let path = summary.write(dir.path()).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["mode"], "decentralized");
        assert_eq!(value["stop_reason"], "cycle_budget");
        assert_eq!(value["run"], 4);
        assert_eq!(value["cycles"], 12);
        assert_eq!(value["weights_failed"][0], 2);
        assert_eq!(value["run_id"].as_str().unwrap().len(), 36);
    }

    #[test]
    fn test_write_into_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let summary = RunSummary::new(RunMode::Centralized, 0, Utc::now(), StopReason::Aborted);
        assert!(summary.write(&dir.path().join("nope")).is_err());
    }
}
