//! Timing and paging knobs, loadable from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PickerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// How often a folder with in-flight files is re-listed.
    pub poll_interval_ms: u64,
    /// Raw status is ignored for this long after a rebuild is submitted.
    pub suppression_window_ms: u64,
    /// Unconfirmed pending paths are dropped this long after the rebuild
    /// response.
    pub grace_period_ms: u64,
    pub page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
            suppression_window_ms: 3_000,
            grace_period_ms: 30_000,
            page_size: 100,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PickerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| PickerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(PickerError::Config("poll_interval_ms must be positive".into()));
        }
        if self.page_size == 0 {
            return Err(PickerError::Config("page_size must be positive".into()));
        }
        if self.grace_period_ms < self.suppression_window_ms {
            return Err(PickerError::Config(format!(
                "grace_period_ms ({}) is shorter than suppression_window_ms ({})",
                self.grace_period_ms, self.suppression_window_ms
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn suppression_window(&self) -> Duration {
        Duration::from_millis(self.suppression_window_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}
