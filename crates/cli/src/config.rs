use anyhow::{Context, Result};
use orchestrator::{ControllerConfig, DEFAULT_GUARD_TIMEOUT, DEFAULT_POLL_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const COMMIT_DIR: &str = ".circle-commit";
pub const CONFIG_FILE: &str = "config.toml";

const DEFAULT_LATENCY_MS: u64 = 1_500;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CommitConfig {
    #[serde(default)]
    pub controller: ControllerSection,
    #[serde(default)]
    pub simulation: SimulationSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    pub guard_timeout_secs: u64,
    /// Longest a single outcome query may take before it reads as pending
    pub poll_timeout_secs: u64,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            guard_timeout_secs: DEFAULT_GUARD_TIMEOUT.as_secs(),
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    /// Time between submission and inclusion for scripted operations
    pub latency_ms: u64,
    /// Deliver inclusion notices over the push channel
    pub push: bool,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            latency_ms: DEFAULT_LATENCY_MS,
            push: true,
        }
    }
}

impl CommitConfig {
    /// Read `<dir>/.circle-commit/config.toml`, falling back to defaults when absent.
    pub async fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(COMMIT_DIR).join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", config_path.display()))
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig::new(Duration::from_secs(self.controller.guard_timeout_secs))
            .with_poll_timeout(Duration::from_secs(self.controller.poll_timeout_secs))
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.simulation.latency_ms)
    }
}
