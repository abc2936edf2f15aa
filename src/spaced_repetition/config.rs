use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::algorithm::Sm2Params;
use super::session::SessionSizing;
use super::stats::StatsThresholds;
use super::SpacedRepetitionError;

/// Engine tunables, persisted as `config.json` next to the progress data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub sm2: Sm2Params,
    pub session: SessionSizing,
    pub stats: StatsThresholds,
    /// Total read-update-write attempts before a conflict is surfaced.
    pub max_write_attempts: u32,
    pub store_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sm2: Sm2Params::default(),
            session: SessionSizing::default(),
            stats: StatsThresholds::default(),
            max_write_attempts: 3,
            store_timeout_ms: 5_000,
        }
    }
}

impl EngineConfig {
    const CONFIG_FILE: &'static str = "config.json";

    /// Reads `config.json` from `dir`, falling back to defaults when absent.
    pub fn load(dir: &Path) -> Result<Self, SpacedRepetitionError> {
        let path = dir.join(Self::CONFIG_FILE);
        let config = if path.exists() {
            let data = fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, dir: &Path) -> Result<(), SpacedRepetitionError> {
        self.validate()?;
        fs::create_dir_all(dir)?;
        let data = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(Self::CONFIG_FILE), data)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SpacedRepetitionError> {
        self.sm2.validate()?;
        self.session.validate()?;
        self.stats.validate()?;
        if self.max_write_attempts == 0 {
            return Err(SpacedRepetitionError::InvalidConfig(
                "max_write_attempts must be at least 1".to_string(),
            ));
        }
        if self.store_timeout_ms == 0 {
            return Err(SpacedRepetitionError::InvalidConfig(
                "store_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
