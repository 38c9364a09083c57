//! # hl-search
//!
//! Core of the Hyperloom search coordinator.
//!
//! Provides a sampler that draws never-repeated configurations from a mixed
//! discrete / continuous search template, a launcher that starts one wrapper
//! process per configuration and can interrupt the training program nested
//! beneath it, and a status tracker that rebuilds per-run state and metric
//! history from run directories and the live process tree.

mod config;
mod launcher;
mod observer;
mod process;
mod sampler;
mod status;

pub use config::{LauncherConfig, TrackerConfig, DEFAULT_ID_FLAG, DEFAULT_RUNS_ROOT};
pub use launcher::{LaunchedRun, RunLauncher, StopOutcome};
pub use observer::{
    ChannelObserver, MemoryObserver, RunStatusEvent, StatusObserver, TracingObserver,
};
pub use process::{ProcessEntry, ProcessSnapshot, ProcessTable, SystemProcessTable};
pub use sampler::{Axis, Cardinality, Configuration, Sample, Sampler};
pub use status::{KillPolicy, NeverKill, RunStatus};
