use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use gadget_protocol::{FailState, NodeConfig};
use serde::{Deserialize, Serialize};

use crate::pegasos::DEFAULT_TOLERANCE;

fn default_size() -> usize {
    20
}

fn default_cycles() -> u64 {
    100_000
}

fn default_degree() -> usize {
    3
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_size")]
    pub size: usize,
    /// Upper bound on scheduler cycles.
    #[serde(default = "default_cycles")]
    pub cycles: u64,
    /// Out-degree of the random peer wiring.
    #[serde(default = "default_degree")]
    pub degree: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            size: default_size(),
            cycles: default_cycles(),
            degree: default_degree(),
        }
    }
}

/// A fail-state change applied to registry slot `node` at the start of `cycle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultEvent {
    pub cycle: u64,
    pub node: usize,
    pub state: FailState,
}

/// Decentralized run settings, loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_tolerance")]
    pub convergence_tolerance: f64,
    #[serde(default)]
    pub faults: Vec<FaultEvent>,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub network_size: Option<usize>,
    pub cycles: Option<u64>,
    pub run: Option<u32>,
    pub seed: Option<u64>,
}

impl SimConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: SimConfig = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(size) = overrides.network_size {
            self.network.size = size;
        }
        if let Some(cycles) = overrides.cycles {
            self.network.cycles = cycles;
        }
        if let Some(run) = overrides.run {
            self.node.run = run;
        }
        if overrides.seed.is_some() {
            self.seed = overrides.seed;
        }
    }

    /// Checks the settings the node template does not see.
    pub fn validate(&self) -> Result<()> {
        if self.network.size == 0 {
            bail!("network.size must be at least 1");
        }
        if self.network.cycles == 0 {
            bail!("network.cycles must be at least 1");
        }
        if self.convergence_tolerance.is_nan() || self.convergence_tolerance < 0.0 {
            bail!(
                "convergence_tolerance must be non-negative, got {}",
                self.convergence_tolerance
            );
        }
        for fault in &self.faults {
            if fault.node >= self.network.size {
                bail!(
                    "fault at cycle {} targets node {} but the network has {} nodes",
                    fault.cycle,
                    fault.node,
                    self.network.size
                );
            }
        }
        Ok(())
    }

    /// Fault events scheduled for `cycle`, in file order.
    pub fn faults_at(&self, cycle: u64) -> impl Iterator<Item = &FaultEvent> {
        self.faults.iter().filter(move |f| f.cycle == cycle)
    }
}

/// Centralized baseline settings, straight from the command line.
#[derive(Debug, Clone)]
pub struct CentralConfig {
    pub train_dir: PathBuf,
    pub test_dir: PathBuf,
    pub lambda: f64,
    pub epochs: u64,
    pub run: u32,
    pub dimension: usize,
    pub seed: Option<u64>,
    pub tolerance: f64,
}

impl CentralConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lambda.is_nan() || self.lambda <= 0.0 {
            bail!("lambda must be positive, got {}", self.lambda);
        }
        if self.epochs == 0 {
            bail!("epochs must be at least 1");
        }
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            bail!("tolerance must be non-negative, got {}", self.tolerance);
        }
        Ok(())
    }

    /// `<parent of train_dir>/run<N>`.
    pub fn output_dir(&self) -> PathBuf {
        let parent = self
            .train_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        parent.join(format!("run{}", self.run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config: SimConfig =
            serde_json::from_str(r#"{ "node": { "resource_path": "/data/res" } }"#).unwrap();
        assert_eq!(config.network.size, 20);
        assert_eq!(config.network.cycles, 100_000);
        assert_eq!(config.node.lambda, 0.001);
        assert_eq!(config.node.max_iter, 100_000);
        assert_eq!(config.convergence_tolerance, DEFAULT_TOLERANCE);
        assert!(config.faults.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_faults_parse_and_validate() {
        let config: SimConfig = serde_json::from_str(
            r#"{
                "network": { "size": 2, "cycles": 10 },
                "faults": [
                    { "cycle": 3, "node": 1, "state": "down" },
                    { "cycle": 5, "node": 1, "state": "ok" },
                    { "cycle": 5, "node": 0, "state": "dead" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.faults_at(5).count(), 2);
        assert_eq!(config.faults[1].state, FailState::Up);
        config.validate().unwrap();

        let mut bad = config.clone();
        bad.faults.push(FaultEvent {
            cycle: 0,
            node: 2,
            state: FailState::Down,
        });
        assert!(bad.validate().is_err());

        let unknown = serde_json::from_str::<SimConfig>(
            r#"{ "faults": [ { "cycle": 0, "node": 0, "state": "zombie" } ] }"#,
        );
        assert!(unknown.is_err());
    }

    #[test]
    fn test_overrides_win() {
        let mut config: SimConfig = serde_json::from_str("{}").unwrap();
        config.apply(&Overrides {
            network_size: Some(4),
            cycles: Some(7),
            run: Some(2),
            seed: Some(9),
        });
        assert_eq!(config.network.size, 4);
        assert_eq!(config.network.cycles, 7);
        assert_eq!(config.node.run, 2);
        assert_eq!(config.seed, Some(9));
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = SimConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("sim.json"));
    }

    #[test]
    fn test_central_output_dir_is_sibling_of_train() {
        let cfg = CentralConfig {
            train_dir: PathBuf::from("/data/pegasos/train"),
            test_dir: PathBuf::from("/data/pegasos/test"),
            lambda: 0.01,
            epochs: 10,
            run: 3,
            dimension: 0,
            seed: None,
            tolerance: DEFAULT_TOLERANCE,
        };
        assert_eq!(cfg.output_dir(), PathBuf::from("/data/pegasos/run3"));
        cfg.validate().unwrap();
        assert!(CentralConfig { lambda: 0.0, ..cfg }.validate().is_err());
    }
}
