//! Process-tree termination
//!
//! [`Terminator::terminate`] stops a managed process together with everything
//! it spawned:
//!
//! 1. enumerate the descendants, deepest first
//! 2. send a graceful signal to each descendant, then the process, then its group
//! 3. wait up to the grace period for all of them, and every other member of
//!    the group, to disappear
//! 4. forcefully kill whatever is left, in the same order, and wait briefly
//!
//! The group check catches workers that were re-parented away from the
//! server, which the descendant walk can no longer see.
//!
//! A process that is already gone is not an error, so terminating twice is
//! safe. A refused signal is reported only after every other target has been
//! handled.

use crate::supervisor::ManagedProcess;
use crate::{CoreError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Interval between liveness checks while waiting for processes to exit
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of one kill request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The signal was delivered
    Signalled,
    /// The target no longer existed
    AlreadyExited,
}

/// OS capability for inspecting and signalling processes
///
/// One implementation exists per target OS; tests substitute a mock.
pub trait ProcessControl: Send + Sync {
    /// All transitive descendants of `pid`, children before their parents
    fn find_descendants(&self, pid: u32) -> Vec<u32>;

    /// Request termination of one process
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ProcessSignal`] if the process is alive but the
    /// OS refuses the request.
    fn kill(&self, pid: u32, force: bool) -> Result<KillOutcome>;

    /// Request termination of a whole process group, where the OS has them
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ProcessSignal`] if a live member cannot be signalled.
    fn kill_group(&self, _pgid: u32, _force: bool) -> Result<KillOutcome> {
        Ok(KillOutcome::AlreadyExited)
    }

    /// Whether `pid` is still running
    fn is_alive(&self, pid: u32) -> bool;

    /// Whether any member of process group `pgid` is still running
    fn group_alive(&self, _pgid: u32) -> bool {
        false
    }
}

/// What a termination did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationReport {
    /// The managed process
    pub pid: u32,
    /// Descendants found when termination began, deepest first
    pub descendants: Vec<u32>,
    /// The managed process had exited before termination began
    pub already_exited: bool,
    /// Graceful termination timed out and SIGKILL-level force was used
    pub forced: bool,
}

/// Terminates managed processes and their descendants
#[derive(Clone)]
pub struct Terminator {
    control: Arc<dyn ProcessControl>,
    grace_period: Duration,
    kill_wait: Duration,
}

impl std::fmt::Debug for Terminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminator")
            .field("grace_period", &self.grace_period)
            .field("kill_wait", &self.kill_wait)
            .finish_non_exhaustive()
    }
}

impl Terminator {
    /// Create a terminator
    ///
    /// * `grace_period` - how long to wait after the graceful signal
    /// * `kill_wait` - how long to wait after the forceful kill
    pub fn new(
        control: Arc<dyn ProcessControl>,
        grace_period: Duration,
        kill_wait: Duration,
    ) -> Self {
        Self {
            control,
            grace_period,
            kill_wait,
        }
    }

    /// Terminate `process` and every process it transitively spawned
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ProcessSignal`] if the OS refused to signal a live
    /// process, or [`CoreError::ProcessWait`] if something survived the
    /// forceful kill. Both are reported after all targets were attempted.
    pub async fn terminate(&self, process: &mut dyn ManagedProcess) -> Result<TerminationReport> {
        let pid = process.pid();
        let already_exited = process.has_exited();

        // An exited PID may already belong to an unrelated process, so only
        // the process group is swept in that case
        let descendants = if already_exited {
            Vec::new()
        } else {
            self.query(move |control| control.find_descendants(pid))
                .await
                .unwrap_or_default()
        };

        let mut report = TerminationReport {
            pid,
            descendants: descendants.clone(),
            already_exited,
            forced: false,
        };
        let mut first_error: Option<CoreError> = None;

        debug!(
            "Terminating process {} (exited: {}, descendants: {:?})",
            pid, already_exited, descendants
        );
        self.signal_all(pid, &descendants, already_exited, false, &mut first_error);

        if self
            .wait_until_gone(process, &descendants, self.grace_period)
            .await
        {
            info!("Process {} and its descendants exited gracefully", pid);
            return finish(report, first_error);
        }

        warn!(
            "Process {} did not exit gracefully within {:?}, killing forcefully",
            pid, self.grace_period
        );
        report.forced = true;

        let survivors: Vec<u32> = descendants
            .iter()
            .copied()
            .filter(|d| self.control.is_alive(*d))
            .collect();
        let pid_exited = process.has_exited();
        self.signal_all(pid, &survivors, pid_exited, true, &mut first_error);

        if !self
            .wait_until_gone(process, &survivors, self.kill_wait)
            .await
        {
            let err = CoreError::ProcessWait(format!(
                "Process {} or its descendants did not exit even after SIGKILL within {:?}",
                pid, self.kill_wait
            ));
            warn!("{}", err);
            first_error.get_or_insert(err);
        }

        finish(report, first_error)
    }

    /// Forcefully kill `pid` and its tree without waiting for anything
    ///
    /// For contexts that cannot await, such as `Drop`. Every target is
    /// attempted; failures are only logged.
    pub fn kill_tree_now(&self, pid: u32) {
        let descendants = self.control.find_descendants(pid);
        let mut first_error = None;
        self.signal_all(pid, &descendants, false, true, &mut first_error);
        if let Some(e) = first_error {
            warn!("Immediate kill of process {} was incomplete: {}", pid, e);
        }
    }

    /// Signal descendants, then the process itself, then its group
    fn signal_all(
        &self,
        pid: u32,
        descendants: &[u32],
        skip_pid: bool,
        force: bool,
        first_error: &mut Option<CoreError>,
    ) {
        let mut record = |result: Result<KillOutcome>| {
            if let Err(e) = result {
                warn!("Termination step failed: {}", e);
                first_error.get_or_insert(e);
            }
        };

        for &descendant in descendants {
            record(self.control.kill(descendant, force));
        }
        if !skip_pid {
            record(self.control.kill(pid, force));
        }
        record(self.control.kill_group(pid, force));
    }

    /// Poll until the process, all `others` and its group are gone, or
    /// `window` elapses
    async fn wait_until_gone(
        &self,
        process: &mut dyn ManagedProcess,
        others: &[u32],
        window: Duration,
    ) -> bool {
        let deadline = Instant::now() + window;
        loop {
            if self.all_gone(process, others).await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn all_gone(&self, process: &mut dyn ManagedProcess, others: &[u32]) -> bool {
        let pid = process.pid();
        let pid_gone = process.has_exited() || !self.control.is_alive(pid);
        if !pid_gone || others.iter().any(|d| self.control.is_alive(*d)) {
            return false;
        }
        let group_alive = self
            .query(move |control| control.group_alive(pid))
            .await
            .unwrap_or(false);
        if group_alive {
            debug!("Process group {} still has running members", pid);
        }
        !group_alive
    }

    /// Run a process-table query on the blocking pool
    async fn query<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&dyn ProcessControl) -> T + Send + 'static,
        T: Send + 'static,
    {
        let control = Arc::clone(&self.control);
        match tokio::task::spawn_blocking(move || f(control.as_ref())).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Process table query failed: {}", e);
                None
            }
        }
    }
}

fn finish(report: TerminationReport, error: Option<CoreError>) -> Result<TerminationReport> {
    match error {
        Some(e) => Err(e),
        None => Ok(report),
    }
}
