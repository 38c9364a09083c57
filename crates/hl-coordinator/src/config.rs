//! Driver configuration.

use hl_search::{LauncherConfig, TrackerConfig};
use hl_types::{config_error, SearchResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Optional path to a JSON [`CoordinatorConfig`].
pub const CONFIG_ENV: &str = "HYPERLOOM_CONFIG";
/// Overrides the runs root of both the launcher and the tracker.
pub const RUNS_ROOT_ENV: &str = "HYPERLOOM_RUNS_ROOT";

/// Colliding draws in a row before the sampler is treated as exhausted.
pub const DEFAULT_RETRY_LIMIT: usize = 1000;

/// Top-level configuration for a search session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub launcher: LauncherConfig,
    pub tracker: TrackerConfig,

    /// How many runs to keep going at once.
    pub max_concurrent_runs: usize,

    /// Stop launching after this many runs. `None` = until the space is
    /// exhausted.
    pub max_runs: Option<usize>,

    /// Seconds between status polls.
    pub poll_interval_secs: u64,

    /// Seed for the sampler; random when absent.
    pub seed: Option<u64>,

    /// Give up on the search space after this many colliding draws in a
    /// row. `None` retries forever, which hangs on templates with duplicate
    /// `values` or a zero-width range.
    pub retry_limit: Option<usize>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            launcher: LauncherConfig::default(),
            tracker: TrackerConfig::default(),
            max_concurrent_runs: 4,
            max_runs: None,
            poll_interval_secs: 30,
            seed: None,
            retry_limit: Some(DEFAULT_RETRY_LIMIT),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> SearchResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `HYPERLOOM_CONFIG` if set (defaults otherwise) and apply
    /// `HYPERLOOM_RUNS_ROOT`.
    pub fn from_env() -> SearchResult<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        if let Some(root) = std::env::var_os(RUNS_ROOT_ENV) {
            config = config.with_runs_root(root);
        }
        config.validate()?;
        Ok(config)
    }

    /// Point both the launcher and the tracker at `root`.
    pub fn with_runs_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.launcher.runs_root = root.clone();
        self.tracker.runs_root = root;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.max_concurrent_runs = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> SearchResult<()> {
        if self.max_concurrent_runs == 0 {
            return Err(config_error!("max_concurrent_runs must be at least 1"));
        }
        if self.launcher.wrapper.is_empty() {
            return Err(config_error!("launcher.wrapper must name a command"));
        }
        if self.launcher.runs_root != self.tracker.runs_root {
            return Err(config_error!(
                "launcher writes runs to {} but the tracker reads {}",
                self.launcher.runs_root.display(),
                self.tracker.runs_root.display()
            ));
        }
        if self.launcher.id_flag != self.tracker.id_flag {
            return Err(config_error!(
                "launcher passes the run id with {} but the tracker looks for {}",
                self.launcher.id_flag,
                self.tracker.id_flag
            ));
        }
        Ok(())
    }
}
