//! Process-table introspection shared by every platform
//!
//! Descendants are found by following parent links in a fresh snapshot of
//! the OS process table. A child only counts if it started no earlier than
//! its parent: Windows never clears a dead parent's PID, so once that PID is
//! reused the older orphans would otherwise look like the new owner's
//! children. Zombies count as dead: they no longer run and only wait to be
//! reaped by their parent.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use sysinfo::{Pid, Process, ProcessStatus, ProcessesToUpdate, System};
use tracing::debug;

/// One row of the process table, as needed to build the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProcessLink {
    pub pid: u32,
    pub parent: Option<u32>,
    /// Seconds since the epoch
    pub start_time: u64,
}

/// Snapshot-based view of the OS process table
#[derive(Debug)]
pub struct ProcessTable {
    system: Mutex<System>,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    /// Create an empty table; it is refreshed on every query
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, System> {
        // A poisoned lock only means another query panicked mid-refresh;
        // the next refresh overwrites whatever it left behind
        self.system
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// All transitive descendants of `root`, deepest first
    ///
    /// Children always appear before their parents, so signalling in this
    /// order never leaves a live parent behind a dead child. Refreshes the
    /// whole table, so call it off the async runtime threads.
    pub fn descendants(&self, root: u32) -> Vec<u32> {
        let mut system = self.lock();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let links: Vec<ProcessLink> = system
            .processes()
            .iter()
            // Threads are listed as tasks on Linux; they die with their process
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| ProcessLink {
                pid: pid.as_u32(),
                parent: process.parent().map(Pid::as_u32),
                start_time: process.start_time(),
            })
            .collect();
        drop(system);

        let ordered = post_order(root, &child_map(&links));
        debug!("Process {} has descendants {:?}", root, ordered);
        ordered
    }

    /// Whether `pid` exists and is not a zombie
    pub fn is_alive(&self, pid: u32) -> bool {
        let target = Pid::from_u32(pid);
        let mut system = self.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        system.process(target).is_some_and(is_running)
    }

    /// Whether any running process still belongs to session `sid`
    ///
    /// Refreshes the whole table, like [`ProcessTable::descendants`].
    #[cfg(unix)]
    pub fn session_alive(&self, sid: u32) -> bool {
        let session = Pid::from_u32(sid);
        let mut system = self.lock();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system.processes().values().any(|process| {
            process.thread_kind().is_none()
                && process.session_id() == Some(session)
                && is_running(process)
        })
    }
}

fn is_running(process: &Process) -> bool {
    !matches!(
        process.status(),
        ProcessStatus::Zombie | ProcessStatus::Dead
    )
}

/// Parent to children map, skipping children older than their parent
pub(crate) fn child_map(links: &[ProcessLink]) -> HashMap<u32, Vec<u32>> {
    let started: HashMap<u32, u64> = links.iter().map(|l| (l.pid, l.start_time)).collect();

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for link in links {
        let Some(parent) = link.parent else {
            continue;
        };
        if started
            .get(&parent)
            .is_some_and(|parent_start| link.start_time < *parent_start)
        {
            continue;
        }
        children.entry(parent).or_default().push(link.pid);
    }
    children
}

/// Walk the child map from `root`, emitting every node after its children
pub(crate) fn post_order(root: u32, children: &HashMap<u32, Vec<u32>>) -> Vec<u32> {
    let mut ordered = Vec::new();
    let mut visited = HashSet::from([root]);
    // (pid, children already expanded)
    let mut stack: Vec<(u32, bool)> = children
        .get(&root)
        .map(|kids| kids.iter().map(|k| (*k, false)).collect())
        .unwrap_or_default();

    while let Some((pid, expanded)) = stack.pop() {
        if expanded {
            ordered.push(pid);
            continue;
        }
        if !visited.insert(pid) {
            continue;
        }
        stack.push((pid, true));
        if let Some(kids) = children.get(&pid) {
            stack.extend(kids.iter().map(|k| (*k, false)));
        }
    }
    ordered
}
