//! Process-table introspection and signal delivery.
//!
//! Everything platform-specific sits behind [`ProcessTable`]; the launcher and
//! the status tracker only ever see pids and argv vectors.

use hl_types::{SearchError, SearchResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, Signal, System, UpdateKind};
use tracing::debug;

/// A live descendant process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub command: Vec<String>,
}

impl ProcessEntry {
    /// Value following `flag` in the argv, if any.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        let idx = self.command.iter().position(|arg| arg == flag)?;
        self.command.get(idx + 1).map(String::as_str)
    }
}

/// Minimal view of the OS process table.
pub trait ProcessTable: Send + Sync {
    /// All live descendants of `root`, breadth-first. `None` if `root` itself
    /// no longer exists.
    fn descendants(&self, root: u32) -> Option<Vec<ProcessEntry>>;

    /// Ask `pid` to shut down gracefully (SIGINT on unix).
    fn interrupt(&self, pid: u32) -> SearchResult<()>;
}

/// One row of a process-table listing.
#[derive(Debug, Clone)]
struct ProcessNode {
    parent: Option<u32>,
    command: Vec<String>,
    zombie: bool,
}

fn walk(nodes: &HashMap<u32, ProcessNode>, root: u32) -> Option<Vec<ProcessEntry>> {
    match nodes.get(&root) {
        Some(node) if !node.zombie => {}
        _ => return None,
    }

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, node) in nodes {
        if let Some(parent) = node.parent {
            children.entry(parent).or_default().push(*pid);
        }
    }
    for kids in children.values_mut() {
        kids.sort_unstable();
    }

    let mut found = Vec::new();
    let mut visited = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        for child in children.get(&pid).map(Vec::as_slice).unwrap_or_default() {
            if !visited.insert(*child) {
                continue;
            }
            queue.push_back(*child);
            let node = &nodes[child];
            // Zombies have already exited; their argv is gone anyway.
            if !node.zombie {
                found.push(ProcessEntry {
                    pid: *child,
                    command: node.command.clone(),
                });
            }
        }
    }
    Some(found)
}

/// [`ProcessTable`] backed by a fresh `sysinfo` scan on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl SystemProcessTable {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessTable for SystemProcessTable {
    fn descendants(&self, root: u32) -> Option<Vec<ProcessEntry>> {
        let mut sys = System::new();
        // The default process refresh leaves argv empty.
        sys.refresh_processes_specifics(
            ProcessRefreshKind::new().with_cmd(UpdateKind::OnlyIfNotSet),
        );

        let nodes: HashMap<u32, ProcessNode> = sys
            .processes()
            .iter()
            // Threads are listed as children of their process on Linux.
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| {
                (
                    pid.as_u32(),
                    ProcessNode {
                        parent: process.parent().map(|p| p.as_u32()),
                        command: process.cmd().to_vec(),
                        zombie: process.status() == ProcessStatus::Zombie,
                    },
                )
            })
            .collect();
        debug!("Scanned {} processes looking for descendants of {}", nodes.len(), root);

        walk(&nodes, root)
    }

    fn interrupt(&self, pid: u32) -> SearchResult<()> {
        let target = Pid::from_u32(pid);
        let mut sys = System::new();
        sys.refresh_process(target);

        let process = sys.process(target).ok_or_else(|| SearchError::Signal {
            pid,
            message: "no such process".to_string(),
        })?;
        match process.kill_with(Signal::Interrupt) {
            Some(true) => Ok(()),
            Some(false) => Err(SearchError::Signal {
                pid,
                message: "interrupt delivery failed".to_string(),
            }),
            None => Err(SearchError::Signal {
                pid,
                message: "interrupt is not supported on this platform".to_string(),
            }),
        }
    }
}

/// A frozen, in-memory process table.
///
/// Useful for replaying a captured listing and for exercising reconciliation
/// logic without real child processes. Interrupts are recorded, not sent.
#[derive(Debug, Default)]
pub struct ProcessSnapshot {
    nodes: HashMap<u32, ProcessNode>,
    interrupted: Mutex<Vec<u32>>,
}

impl ProcessSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a process. `parent` of `None` marks a root.
    pub fn with_process<I, S>(mut self, pid: u32, parent: Option<u32>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nodes.insert(
            pid,
            ProcessNode {
                parent,
                command: command.into_iter().map(Into::into).collect(),
                zombie: false,
            },
        );
        self
    }

    /// Add a process that has exited but not been reaped.
    pub fn with_zombie(mut self, pid: u32, parent: Option<u32>) -> Self {
        self.nodes.insert(
            pid,
            ProcessNode {
                parent,
                command: Vec::new(),
                zombie: true,
            },
        );
        self
    }

    /// Pids that received an interrupt, in order.
    pub fn interrupted(&self) -> Vec<u32> {
        self.interrupted.lock().clone()
    }
}

impl ProcessTable for ProcessSnapshot {
    fn descendants(&self, root: u32) -> Option<Vec<ProcessEntry>> {
        walk(&self.nodes, root)
    }

    fn interrupt(&self, pid: u32) -> SearchResult<()> {
        match self.nodes.get(&pid) {
            Some(node) if !node.zombie => {
                self.interrupted.lock().push(pid);
                Ok(())
            }
            _ => Err(SearchError::Signal {
                pid,
                message: "no such process".to_string(),
            }),
        }
    }
}
