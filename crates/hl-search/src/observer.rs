//! Sinks for the per-run status line emitted whenever a [`crate::RunStatus`]
//! snapshot is built.

use crossbeam_channel::Sender;
use hl_types::RunState;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Resolved state of one run in a status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusEvent {
    pub run_id: String,
    pub state: RunState,
    pub metric_count: usize,
    pub min_metric: Option<f64>,
}

impl std::fmt::Display for RunStatusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} : state={}", self.run_id, self.state)
    }
}

pub trait StatusObserver: Send + Sync {
    fn on_run_status(&self, event: &RunStatusEvent);
}

impl<O: StatusObserver + ?Sized> StatusObserver for Arc<O> {
    fn on_run_status(&self, event: &RunStatusEvent) {
        (**self).on_run_status(event)
    }
}

/// Logs each event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl StatusObserver for TracingObserver {
    fn on_run_status(&self, event: &RunStatusEvent) {
        info!(
            run_id = %event.run_id,
            state = %event.state,
            metrics = event.metric_count,
            "{event}"
        );
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryObserver {
    events: Mutex<Vec<RunStatusEvent>>,
}

impl MemoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunStatusEvent> {
        self.events.lock().clone()
    }

    /// Rendered status lines, in emission order.
    pub fn lines(&self) -> Vec<String> {
        self.events.lock().iter().map(ToString::to_string).collect()
    }
}

impl StatusObserver for MemoryObserver {
    fn on_run_status(&self, event: &RunStatusEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Forwards events to a channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<RunStatusEvent>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<RunStatusEvent>) -> Self {
        Self { tx }
    }
}

impl StatusObserver for ChannelObserver {
    fn on_run_status(&self, event: &RunStatusEvent) {
        // Best-effort send; a dropped receiver just means nobody is listening.
        let _ = self.tx.try_send(event.clone());
    }
}
