//! The search loop: keep every slot busy with a fresh configuration and keep
//! track of the best run so far.

use hl_search::{
    KillPolicy, LaunchedRun, NeverKill, ProcessTable, RunLauncher, RunStatus, Sampler,
    StatusObserver, StopOutcome, SystemProcessTable, TracingObserver,
};
use hl_types::{RunId, SearchError, SearchResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::CoordinatorConfig;

/// What one [`Coordinator::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Runs started during this tick.
    pub launched: Vec<RunId>,
    /// Runs interrupted because the kill policy asked for it.
    pub stopped: Vec<RunId>,
    /// Runs observed running at the start of the tick.
    pub running: usize,
    /// Best `(run id, metric)` observed at the start of the tick.
    pub best: Option<(RunId, f64)>,
    /// No further configurations will be drawn.
    pub exhausted: bool,
}

/// Drives one search session.
pub struct Coordinator<P: ProcessTable = SystemProcessTable> {
    config: CoordinatorConfig,
    program: PathBuf,
    sampler: Sampler,
    launcher: RunLauncher<P>,
    observer: Box<dyn StatusObserver>,
    kill_policy: Arc<dyn KillPolicy>,
    /// One entry per concurrent run; `None` until something is launched there.
    slots: Vec<Option<LaunchedRun>>,
    /// Replaced or stopped runs whose wrapper may still be shutting down.
    retired: Vec<LaunchedRun>,
    launched: Vec<RunId>,
    exhausted: bool,
}

impl Coordinator<SystemProcessTable> {
    pub fn new(config: CoordinatorConfig, sampler: Sampler, program: impl Into<PathBuf>) -> Self {
        Self::with_process_table(config, sampler, program, SystemProcessTable::new())
    }
}

impl<P: ProcessTable> Coordinator<P> {
    pub fn with_process_table(
        config: CoordinatorConfig,
        sampler: Sampler,
        program: impl Into<PathBuf>,
        processes: P,
    ) -> Self {
        let sampler = match config.seed {
            Some(seed) => sampler.with_seed(seed),
            None => sampler,
        };
        let sampler = match config.retry_limit {
            Some(limit) => sampler.with_retry_limit(limit),
            None => sampler,
        };
        let launcher = RunLauncher::with_process_table(config.launcher.clone(), processes);
        let slots = (0..config.max_concurrent_runs).map(|_| None).collect();

        Self {
            config,
            program: program.into(),
            sampler,
            launcher,
            observer: Box::new(TracingObserver),
            kill_policy: Arc::new(NeverKill),
            slots,
            retired: Vec::new(),
            launched: Vec::new(),
            exhausted: false,
        }
    }

    pub fn with_observer(mut self, observer: impl StatusObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn with_kill_policy(mut self, policy: impl KillPolicy + 'static) -> Self {
        self.kill_policy = Arc::new(policy);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Every run id launched in this session, oldest first.
    pub fn launched_ids(&self) -> &[RunId] {
        &self.launched
    }

    /// Runs currently occupying a slot.
    pub fn active_runs(&self) -> impl Iterator<Item = &LaunchedRun> {
        self.slots.iter().flatten()
    }

    /// Whether another configuration may still be launched.
    pub fn can_launch(&self) -> bool {
        !self.exhausted && !self.sampler.is_exhausted() && !self.max_runs_reached()
    }

    /// Nothing is running and nothing new will be started.
    pub fn is_done(&self) -> bool {
        !self.can_launch() && self.slots.iter().all(Option::is_none)
    }

    /// Snapshot every launched run, then refill each slot whose run should
    /// be replaced.
    pub fn tick(&mut self) -> SearchResult<TickReport> {
        self.reap_retired()?;

        let status = RunStatus::new(
            self.launched.iter().cloned(),
            &self.config.tracker,
            self.launcher.process_table(),
            self.observer.as_ref(),
        )?
        .with_kill_policy(Arc::clone(&self.kill_policy));

        let mut report = TickReport {
            running: status.running_count(),
            best: status.best_run(),
            ..TickReport::default()
        };

        for slot in 0..self.slots.len() {
            let current = self.slots[slot].as_ref().map(|run| run.run_id.clone());
            let kill = current
                .as_deref()
                .map_or(false, |run_id| status.should_kill(run_id));
            if !kill && !status.should_replace(current.as_deref())? {
                continue;
            }

            if let Some(mut run) = self.slots[slot].take() {
                if kill {
                    let outcome = self.launcher.stop(&mut run, &self.program)?;
                    debug!("Stopping {}: {:?}", run.run_id, outcome);
                    report.stopped.push(run.run_id.clone());
                }
                self.retired.push(run);
            }

            if let Some(run) = self.launch_next()? {
                report.launched.push(run.run_id.clone());
                self.slots[slot] = Some(run);
            }
        }

        self.reap_retired()?;
        report.exhausted = !self.can_launch();

        if let Some((run_id, metric)) = &report.best {
            info!("Best run so far: {} ({} = {})", run_id, self.config.tracker.metric_key, metric);
        }
        Ok(report)
    }

    /// Interrupt every run still occupying a slot. Does not wait for exit.
    pub fn shutdown(&mut self) -> SearchResult<Vec<(RunId, StopOutcome)>> {
        let mut outcomes = Vec::new();
        for slot in self.slots.iter_mut() {
            if let Some(mut run) = slot.take() {
                let outcome = self.launcher.stop(&mut run, &self.program)?;
                outcomes.push((run.run_id.clone(), outcome));
                self.retired.push(run);
            }
        }
        self.exhausted = true;
        Ok(outcomes)
    }

    fn max_runs_reached(&self) -> bool {
        self.config
            .max_runs
            .map_or(false, |max| self.launched.len() >= max)
    }

    fn launch_next(&mut self) -> SearchResult<Option<LaunchedRun>> {
        if !self.can_launch() {
            return Ok(None);
        }
        let config = match self.sampler.sample() {
            Ok(config) => config,
            Err(SearchError::Exhausted { drawn }) => {
                info!("Search space exhausted after {} samples", drawn);
                self.exhausted = true;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let run = self.launcher.start(&self.program, &config)?;
        self.launched.push(run.run_id.clone());
        Ok(Some(run))
    }

    /// Drop retired wrappers that have exited so they do not linger as
    /// zombies.
    fn reap_retired(&mut self) -> SearchResult<()> {
        let mut still_running = Vec::with_capacity(self.retired.len());
        for mut run in self.retired.drain(..) {
            match run.try_exit_status()? {
                Some(status) => debug!("Run {} exited ({})", run.run_id, status),
                None => still_running.push(run),
            }
        }
        self.retired = still_running;
        Ok(())
    }
}
