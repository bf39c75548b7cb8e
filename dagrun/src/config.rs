//! Scheduler configuration, loaded from a TOML file.
//!
//! Every field has a default, so an absent file or an empty table is a
//! fully valid configuration. Saving writes to a sibling temp file and
//! renames, so readers never observe a half-written config.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::schedule::pool::default_workers;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Worker threads per execution round.
    pub max_workers: usize,
    /// How often a waiting step re-checks its dependencies, in
    /// milliseconds.
    pub poll_interval_ms: u64,
    /// How long a waiting step keeps polling before it is abandoned, in
    /// seconds.
    pub wait_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_workers(),
            poll_interval_ms: 250,
            wait_timeout_secs: 5,
        }
    }
}

impl SchedulerConfig {
    /// Load from `path`, falling back to defaults when the file does not
    /// exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("parsing config at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let text = toml::to_string_pretty(self).context("serializing config")?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .with_context(|| format!("creating config directory {}", dir.display()))?;
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("moving config into place at {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            bail!("max_workers must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be at least 1");
        }
        if self.wait_timeout_secs == 0 {
            bail!("wait_timeout_secs must be at least 1");
        }
        if Duration::from_millis(self.poll_interval_ms) > self.wait_timeout() {
            bail!("poll_interval_ms must not exceed wait_timeout_secs");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}
