//! Launcher and tracker settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where run directories live unless configured otherwise.
pub const DEFAULT_RUNS_ROOT: &str = "wandb";
/// Flag that carries the run id on the wrapper's command line.
pub const DEFAULT_ID_FLAG: &str = "--id";

/// How to invoke the wrapper process for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Directory that holds one `run-<timestamp>-<id>` directory per run.
    pub runs_root: PathBuf,

    /// Wrapper argv prefix, e.g. `["wandb", "run"]`.
    pub wrapper: Vec<String>,

    pub config_flag: String,
    pub id_flag: String,

    /// Interpreter the wrapper uses to start the training program. The
    /// training subprocess is recognised by the exact argv
    /// `[interpreter, program]`.
    pub interpreter: String,

    /// File name of the persisted configuration inside the run directory.
    pub config_file_name: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            runs_root: PathBuf::from(DEFAULT_RUNS_ROOT),
            wrapper: vec!["wandb".to_string(), "run".to_string()],
            config_flag: "--configs".to_string(),
            id_flag: DEFAULT_ID_FLAG.to_string(),
            interpreter: "python".to_string(),
            config_file_name: "config-search.json".to_string(),
        }
    }
}

impl LauncherConfig {
    pub fn with_runs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.runs_root = root.into();
        self
    }

    pub fn with_wrapper<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wrapper = argv.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_interpreter(mut self, interpreter: &str) -> Self {
        self.interpreter = interpreter.to_string();
        self
    }
}

/// Where the tracker looks for run output and how it recognises live runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub runs_root: PathBuf,

    /// Line-delimited JSON metric log written by the worker.
    pub history_file_name: String,

    /// Key of the tracked metric inside each log line. Lower is better.
    pub metric_key: String,

    pub id_flag: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            runs_root: PathBuf::from(DEFAULT_RUNS_ROOT),
            history_file_name: "wandb-history.jsonl".to_string(),
            metric_key: "val_loss".to_string(),
            id_flag: DEFAULT_ID_FLAG.to_string(),
        }
    }
}

impl TrackerConfig {
    pub fn with_runs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.runs_root = root.into();
        self
    }

    pub fn with_metric(mut self, key: &str) -> Self {
        self.metric_key = key.to_string();
        self
    }
}
