//! Run identity, state and the on-disk run-directory naming convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, globally unique run identifier.
pub type RunId = String;

const RUN_DIR_PREFIX: &str = "run-";
/// `YYYYMMDD_HHMMSS`
const TIMESTAMP_LEN: usize = 15;

/// Liveness of a run as last observed by a status snapshot.
///
/// A run that has not been launched yet has no id and therefore no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Finished,
}

impl Default for RunState {
    fn default() -> Self {
        Self::Finished
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// State and metric history for one tracked run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub state: RunState,
    /// Metric values in the order the worker logged them.
    pub history: Vec<f64>,
}

impl RunRecord {
    /// Lowest metric recorded so far.
    pub fn min_metric(&self) -> Option<f64> {
        self.history.iter().copied().reduce(f64::min)
    }
}

/// Directory name for a run started at `started_at`:
/// `run-<YYYYMMDD>_<HHMMSS>-<run_id>`.
pub fn run_dir_name(started_at: DateTime<Utc>, run_id: &str) -> String {
    format!(
        "{RUN_DIR_PREFIX}{}-{run_id}",
        started_at.format("%Y%m%d_%H%M%S")
    )
}

/// Splits a run-directory name into its timestamp and run id.
///
/// Returns `None` for anything that does not follow the naming convention.
pub fn parse_run_dir_name(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix(RUN_DIR_PREFIX)?;
    if rest.len() <= TIMESTAMP_LEN + 1 || !rest.is_char_boundary(TIMESTAMP_LEN) {
        return None;
    }
    let (timestamp, tail) = rest.split_at(TIMESTAMP_LEN);
    let run_id = tail.strip_prefix('-')?;

    let bytes = timestamp.as_bytes();
    let well_formed = bytes.iter().enumerate().all(|(i, b)| match i {
        8 => *b == b'_',
        _ => b.is_ascii_digit(),
    });
    if !well_formed || run_id.is_empty() {
        return None;
    }
    Some((timestamp, run_id))
}

/// Whether `name` is a run directory belonging to exactly `run_id`.
pub fn is_run_dir_for(name: &str, run_id: &str) -> bool {
    matches!(parse_run_dir_name(name), Some((_, id)) if id == run_id)
}
