//! Run status reconstruction from run directories and the live process tree.

use hl_types::{is_run_dir_for, RunId, RunRecord, RunState, SearchError, SearchResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::TrackerConfig;
use crate::observer::{RunStatusEvent, StatusObserver};
use crate::process::ProcessTable;

/// Decides whether a live run should be preempted.
pub trait KillPolicy: Send + Sync {
    fn should_kill(&self, run_id: &str, record: &RunRecord) -> bool;
}

impl<K: KillPolicy + ?Sized> KillPolicy for Arc<K> {
    fn should_kill(&self, run_id: &str, record: &RunRecord) -> bool {
        (**self).should_kill(run_id, record)
    }
}

/// Never preempts anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverKill;

impl KillPolicy for NeverKill {
    fn should_kill(&self, _run_id: &str, _record: &RunRecord) -> bool {
        false
    }
}

/// Point-in-time status of a set of runs.
///
/// Built once from disk and the process table; it never refreshes itself.
/// Build a new one to observe newer state.
pub struct RunStatus {
    runs: BTreeMap<RunId, RunRecord>,
    kill_policy: Box<dyn KillPolicy>,
}

impl std::fmt::Debug for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStatus").field("runs", &self.runs).finish()
    }
}

impl RunStatus {
    /// Snapshot the given runs: read their metric logs, mark the ones with a
    /// live process as running, and report each run to `observer`.
    ///
    /// Fails with [`SearchError::UntrackedRun`] if a live descendant of this
    /// process carries a run id outside `run_ids`.
    pub fn new<I, S>(
        run_ids: I,
        config: &TrackerConfig,
        processes: &dyn ProcessTable,
        observer: &dyn StatusObserver,
    ) -> SearchResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<RunId>,
    {
        let mut status = Self {
            runs: run_ids
                .into_iter()
                .map(|id| (id.into(), RunRecord::default()))
                .collect(),
            kill_policy: Box::new(NeverKill),
        };

        status.query_runs_filesystem(config)?;
        status.query_runs_process_tree(config, processes)?;

        for (run_id, record) in &status.runs {
            observer.on_run_status(&RunStatusEvent {
                run_id: run_id.clone(),
                state: record.state,
                metric_count: record.history.len(),
                min_metric: record.min_metric(),
            });
        }

        Ok(status)
    }

    pub fn with_kill_policy(mut self, policy: impl KillPolicy + 'static) -> Self {
        self.kill_policy = Box::new(policy);
        self
    }

    /// Whether a new run should be started in place of `run_id`.
    ///
    /// `None` means nothing was ever launched in that slot.
    pub fn should_replace(&self, run_id: Option<&str>) -> SearchResult<bool> {
        let Some(run_id) = run_id else {
            return Ok(true);
        };
        match self.record(run_id)?.state {
            RunState::Running => Ok(false),
            RunState::Finished => Ok(true),
        }
    }

    /// Whether `run_id` should be stopped early. Stopping implies replacing.
    pub fn should_kill(&self, run_id: &str) -> bool {
        self.runs
            .get(run_id)
            .map(|record| self.kill_policy.should_kill(run_id, record))
            .unwrap_or(false)
    }

    /// Lowest metric logged by `run_id`, or `None` if nothing is known.
    pub fn min_metric(&self, run_id: Option<&str>) -> Option<f64> {
        self.runs.get(run_id?)?.min_metric()
    }

    /// Run with the lowest metric across all tracked runs.
    ///
    /// Ties go to the smallest run id: records are visited in id order and
    /// only a strictly lower metric displaces the current best.
    pub fn best_run(&self) -> Option<(RunId, f64)> {
        let mut best: Option<(&RunId, f64)> = None;
        for (run_id, record) in &self.runs {
            if let Some(metric) = record.min_metric() {
                if best.map_or(true, |(_, current)| metric < current) {
                    best = Some((run_id, metric));
                }
            }
        }
        best.map(|(run_id, metric)| (run_id.clone(), metric))
    }

    pub fn state(&self, run_id: &str) -> Option<RunState> {
        self.runs.get(run_id).map(|record| record.state)
    }

    pub fn history(&self, run_id: &str) -> Option<&[f64]> {
        self.runs.get(run_id).map(|record| record.history.as_slice())
    }

    pub fn running_count(&self) -> usize {
        self.runs
            .values()
            .filter(|record| record.state == RunState::Running)
            .count()
    }

    fn record(&self, run_id: &str) -> SearchResult<&RunRecord> {
        self.runs.get(run_id).ok_or_else(|| SearchError::UnknownRun {
            run_id: run_id.to_string(),
        })
    }

    fn query_runs_filesystem(&mut self, config: &TrackerConfig) -> SearchResult<()> {
        let run_dirs = match list_run_dirs(&config.runs_root) {
            Ok(names) => names,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Runs root {} does not exist yet", config.runs_root.display());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        for (run_id, record) in self.runs.iter_mut() {
            // Retries reuse the id; the newest directory wins.
            let Some(latest) = run_dirs
                .iter()
                .filter(|name| is_run_dir_for(name, run_id))
                .max()
            else {
                debug!("No run directory for {}", run_id);
                continue;
            };

            let history_path = config
                .runs_root
                .join(latest)
                .join(&config.history_file_name);
            record.history = read_history(&history_path, &config.metric_key)?;
        }
        Ok(())
    }

    fn query_runs_process_tree(
        &mut self,
        config: &TrackerConfig,
        processes: &dyn ProcessTable,
    ) -> SearchResult<()> {
        let me = std::process::id();
        let children = processes.descendants(me).unwrap_or_default();

        for child in &children {
            let Some(run_id) = child.flag_value(&config.id_flag) else {
                continue;
            };
            match self.runs.get_mut(run_id) {
                Some(record) => record.state = RunState::Running,
                None => {
                    return Err(SearchError::UntrackedRun {
                        run_id: run_id.to_string(),
                    })
                }
            }
        }
        Ok(())
    }
}

fn list_run_dirs(root: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}

/// Metric values from a line-delimited JSON log. A missing file is an empty
/// history.
fn read_history(path: &Path, metric_key: &str) -> SearchResult<Vec<f64>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut history = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: Value = match serde_json::from_str(&line) {
            Ok(row) => row,
            Err(e) => {
                // Usually a line the worker has not finished flushing.
                warn!("Skipping {}:{}: {}", path.display(), lineno + 1, e);
                continue;
            }
        };
        match row.get(metric_key).and_then(Value::as_f64) {
            Some(metric) => history.push(metric),
            None => debug!(
                "{}:{} has no numeric {}",
                path.display(),
                lineno + 1,
                metric_key
            ),
        }
    }
    Ok(history)
}
