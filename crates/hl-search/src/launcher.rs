//! Starting wrapper processes for runs and interrupting their training
//! subprocess.

use chrono::{DateTime, Utc};
use hl_types::{config_error, run_dir_name, RunId, SearchError, SearchResult};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::LauncherConfig;
use crate::process::{ProcessTable, SystemProcessTable};
use crate::sampler::Configuration;

/// A wrapper process started by [`RunLauncher::start`].
#[derive(Debug)]
pub struct LaunchedRun {
    pub run_id: RunId,
    pub run_dir: PathBuf,
    pub config_path: PathBuf,
    pub started_at: DateTime<Utc>,
    child: Child,
}

impl LaunchedRun {
    /// Pid of the wrapper process.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Exit status if the wrapper has finished, reaping it. Never blocks.
    pub fn try_exit_status(&mut self) -> SearchResult<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Block until the wrapper exits.
    pub fn wait(&mut self) -> SearchResult<ExitStatus> {
        Ok(self.child.wait()?)
    }
}

/// What [`RunLauncher::stop`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The training subprocess was sent an interrupt.
    Interrupted { pid: u32 },
    /// The wrapper is alive but no descendant matched the training signature.
    NoTrainingProcess,
    /// The wrapper had already exited; nothing to stop.
    AlreadyExited,
}

/// Starts one wrapper process per run and stops runs by interrupting the
/// training program nested beneath the wrapper.
pub struct RunLauncher<P: ProcessTable = SystemProcessTable> {
    config: LauncherConfig,
    processes: P,
}

impl RunLauncher<SystemProcessTable> {
    pub fn new(config: LauncherConfig) -> Self {
        Self::with_process_table(config, SystemProcessTable::new())
    }
}

impl<P: ProcessTable> RunLauncher<P> {
    pub fn with_process_table(config: LauncherConfig, processes: P) -> Self {
        Self { config, processes }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    pub fn process_table(&self) -> &P {
        &self.processes
    }

    /// Argv the training subprocess of a run of `program` is expected to have.
    pub fn training_command(&self, program: &Path) -> Vec<String> {
        vec![
            self.config.interpreter.clone(),
            program.to_string_lossy().into_owned(),
        ]
    }

    /// Launch `program` under the wrapper with `config`, without waiting.
    pub fn start(&self, program: &Path, config: &Configuration) -> SearchResult<LaunchedRun> {
        let (wrapper, wrapper_args) = self
            .config
            .wrapper
            .split_first()
            .ok_or_else(|| config_error!("wrapper command is empty"))?;

        let run_id = Uuid::new_v4().simple().to_string();
        let started_at = Utc::now();
        let run_dir = self
            .config
            .runs_root
            .join(run_dir_name(started_at, &run_id));
        fs::create_dir_all(&run_dir)?;

        let config_path = run_dir.join(&self.config.config_file_name);
        fs::write(&config_path, serde_json::to_string_pretty(config)?)?;

        let capture = |name: &str| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(run_dir.join(name))
        };
        let stdout = capture("stdout")?;
        let stderr = capture("stderr")?;

        let mut command = Command::new(wrapper);
        command
            .args(wrapper_args)
            .arg(&self.config.config_flag)
            .arg(&config_path)
            .arg(&self.config.id_flag)
            .arg(&run_id)
            .arg(program)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        let rendered = format!(
            "{} {} {} {} {} {}",
            self.config.wrapper.join(" "),
            self.config.config_flag,
            config_path.display(),
            self.config.id_flag,
            run_id,
            program.display()
        );
        info!("Running \"{}\"", rendered);

        let child = command.spawn().map_err(|source| SearchError::Launch {
            command: rendered,
            source,
        })?;

        Ok(LaunchedRun {
            run_id,
            run_dir,
            config_path,
            started_at,
            child,
        })
    }

    /// Interrupt the training subprocess of `run`, leaving the wrapper alive
    /// to shut down on its own. Returns without waiting for exit.
    pub fn stop(&self, run: &mut LaunchedRun, program: &Path) -> SearchResult<StopOutcome> {
        if let Some(status) = run.try_exit_status()? {
            info!("Run {} already exited ({})", run.run_id, status);
            return Ok(StopOutcome::AlreadyExited);
        }
        self.stop_pid(run.pid(), program)
    }

    /// Same as [`RunLauncher::stop`] for a wrapper known only by pid.
    pub fn stop_pid(&self, wrapper_pid: u32, program: &Path) -> SearchResult<StopOutcome> {
        let Some(descendants) = self.processes.descendants(wrapper_pid) else {
            info!("Process {} already killed", wrapper_pid);
            return Ok(StopOutcome::AlreadyExited);
        };

        let expected = self.training_command(program);
        let mut matches = descendants
            .iter()
            .filter(|entry| entry.command == expected);

        let Some(target) = matches.next() else {
            warn!(
                "No subprocess of {} matches \"{}\"",
                wrapper_pid,
                expected.join(" ")
            );
            return Ok(StopOutcome::NoTrainingProcess);
        };
        let extra = matches.count();
        if extra > 0 {
            warn!(
                "{} further subprocesses of {} match \"{}\"; only interrupting {}",
                extra,
                wrapper_pid,
                expected.join(" "),
                target.pid
            );
        }

        self.processes.interrupt(target.pid)?;
        info!("Interrupted pid {} under wrapper {}", target.pid, wrapper_pid);
        Ok(StopOutcome::Interrupted { pid: target.pid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessSnapshot;
    use hl_types::parse_run_dir_name;
    use serde_json::{json, Value};

    fn launcher(root: &Path, wrapper: &[&str]) -> RunLauncher<ProcessSnapshot> {
        let config = LauncherConfig::default()
            .with_runs_root(root)
            .with_wrapper(wrapper.iter().copied());
        RunLauncher::with_process_table(config, ProcessSnapshot::new())
    }

    fn sample_config() -> Configuration {
        match json!({
            "lr": {"min": 0.001, "max": 0.1, "value": 0.01},
            "layers": {"values": [1, 2, 3], "value": 2},
            "epochs": 10,
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[cfg(unix)]
    #[test]
    fn start_persists_config_and_capture_files() {
        let root = tempfile::tempdir().unwrap();
        let launcher = launcher(root.path(), &["true"]);
        let config = sample_config();

        let mut run = launcher.start(Path::new("train.py"), &config).unwrap();
        assert!(run.wait().unwrap().success());

        let raw = fs::read_to_string(&run.config_path).unwrap();
        let persisted: Configuration = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted, config);

        assert!(run.run_dir.join("stdout").exists());
        assert!(run.run_dir.join("stderr").exists());
        assert_eq!(run.run_dir.parent(), Some(root.path()));

        let name = run.run_dir.file_name().unwrap().to_str().unwrap();
        let (_, id) = parse_run_dir_name(name).unwrap();
        assert_eq!(id, run.run_id);
    }

    #[cfg(unix)]
    #[test]
    fn run_ids_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let launcher = launcher(root.path(), &["true"]);
        let mut first = launcher.start(Path::new("train.py"), &sample_config()).unwrap();
        let mut second = launcher.start(Path::new("train.py"), &sample_config()).unwrap();
        first.wait().unwrap();
        second.wait().unwrap();
        assert_ne!(first.run_id, second.run_id);
        assert_ne!(first.run_dir, second.run_dir);
    }

    #[cfg(unix)]
    #[test]
    fn wrapper_receives_flags_in_order() {
        let root = tempfile::tempdir().unwrap();
        let launcher = launcher(root.path(), &["echo", "run"]);
        let mut run = launcher.start(Path::new("train.py"), &sample_config()).unwrap();
        run.wait().unwrap();

        let out = fs::read_to_string(run.run_dir.join("stdout")).unwrap();
        let expected = format!(
            "run --configs {} --id {} train.py",
            run.config_path.display(),
            run.run_id
        );
        assert_eq!(out.trim_end(), expected);
    }

    #[cfg(unix)]
    #[test]
    fn stopping_an_exited_run_is_a_no_op() {
        let root = tempfile::tempdir().unwrap();
        let launcher = launcher(root.path(), &["true"]);
        let mut run = launcher.start(Path::new("train.py"), &sample_config()).unwrap();
        run.wait().unwrap();

        let outcome = launcher.stop(&mut run, Path::new("train.py")).unwrap();
        assert_eq!(outcome, StopOutcome::AlreadyExited);
    }

    #[cfg(unix)]
    #[test]
    fn stop_interrupts_real_nested_child() {
        use std::time::{Duration, Instant};

        let root = tempfile::tempdir().unwrap();
        // `sleep 30` under the shell stands in for `python train.py`.
        let config = LauncherConfig::default()
            .with_runs_root(root.path())
            .with_wrapper(["sh", "-c", "sleep 30; true", "sh"])
            .with_interpreter("sleep");
        let launcher = RunLauncher::new(config);
        let program = Path::new("30");
        let mut run = launcher.start(program, &sample_config()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = loop {
            let outcome = launcher.stop(&mut run, program).unwrap();
            if outcome != StopOutcome::NoTrainingProcess || Instant::now() > deadline {
                break outcome;
            }
            std::thread::sleep(Duration::from_millis(20));
        };

        assert!(matches!(outcome, StopOutcome::Interrupted { .. }));
        // The wrapper carries on once its child is gone.
        run.wait().unwrap();
    }

    #[test]
    fn spawn_failure_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let launcher = launcher(root.path(), &["/nonexistent/hyperloom-wrapper"]);
        let err = launcher
            .start(Path::new("train.py"), &sample_config())
            .unwrap_err();
        assert!(matches!(err, SearchError::Launch { .. }));
    }

    #[test]
    fn empty_wrapper_is_a_config_error() {
        let root = tempfile::tempdir().unwrap();
        let launcher = launcher(root.path(), &[]);
        let err = launcher
            .start(Path::new("train.py"), &sample_config())
            .unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }

    #[test]
    fn stop_interrupts_only_the_training_subprocess() {
        let table = ProcessSnapshot::new()
            .with_process(10, None, ["wandb", "run", "--id", "abc", "train.py"])
            .with_process(11, Some(10), ["wandb-internal"])
            .with_process(12, Some(11), ["python", "train.py"])
            .with_process(13, Some(11), ["python", "other.py"]);
        let launcher = RunLauncher::with_process_table(LauncherConfig::default(), table);

        let outcome = launcher.stop_pid(10, Path::new("train.py")).unwrap();
        assert_eq!(outcome, StopOutcome::Interrupted { pid: 12 });
        assert_eq!(launcher.processes.interrupted(), vec![12]);
    }

    #[test]
    fn stop_without_matching_subprocess() {
        let table = ProcessSnapshot::new()
            .with_process(10, None, ["wandb", "run"])
            .with_process(11, Some(10), ["python", "-u", "train.py"]);
        let launcher = RunLauncher::with_process_table(LauncherConfig::default(), table);

        let outcome = launcher.stop_pid(10, Path::new("train.py")).unwrap();
        assert_eq!(outcome, StopOutcome::NoTrainingProcess);
        assert!(launcher.processes.interrupted().is_empty());
    }

    #[test]
    fn stop_on_vanished_wrapper() {
        let launcher =
            RunLauncher::with_process_table(LauncherConfig::default(), ProcessSnapshot::new());
        let outcome = launcher.stop_pid(4242, Path::new("train.py")).unwrap();
        assert_eq!(outcome, StopOutcome::AlreadyExited);
    }
}
