//! Windows process management
//!
//! Windows has no signals. Graceful termination asks the process to close
//! through `taskkill` without `/F`; forceful termination kills the process
//! outright. Descendants come from the shared process table, so the tree is
//! walked the same way as on Unix.

use super::terminate::{KillOutcome, ProcessControl};
use super::tree::ProcessTable;
use crate::{CoreError, Result};
use std::os::windows::process::CommandExt as _;
use std::process::Command as StdCommand;
use std::sync::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::process::Command;
use tracing::{debug, error};

const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Give the child its own process group and no console window
pub(crate) fn configure_command(command: &mut Command) {
    command.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}

/// [`ProcessControl`] for Windows: `taskkill` for graceful, `TerminateProcess` for forceful
#[derive(Debug)]
pub struct WindowsProcessControl {
    table: ProcessTable,
    system: Mutex<System>,
}

impl Default for WindowsProcessControl {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowsProcessControl {
    /// Create a new Windows process control
    pub fn new() -> Self {
        Self {
            table: ProcessTable::new(),
            system: Mutex::new(System::new()),
        }
    }

    fn request_close(pid: u32) -> Result<KillOutcome> {
        let output = StdCommand::new("taskkill")
            .args(["/PID", &pid.to_string()])
            .creation_flags(CREATE_NO_WINDOW)
            .output()
            .map_err(|e| CoreError::ProcessSignal(format!("Failed to run taskkill: {e}")))?;
        if output.status.success() {
            debug!("Asked process {} to close", pid);
        } else {
            // Console servers often have no window to close; the forceful
            // kill after the grace period takes care of them
            debug!(
                "taskkill /PID {} failed: {}",
                pid,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(KillOutcome::Signalled)
    }

    fn terminate_now(&self, pid: u32) -> Result<KillOutcome> {
        let target = Pid::from_u32(pid);
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        match system.process(target) {
            None => Ok(KillOutcome::AlreadyExited),
            Some(process) if process.kill() => Ok(KillOutcome::Signalled),
            Some(_) => {
                error!("Failed to kill process {}", pid);
                Err(CoreError::ProcessSignal(format!(
                    "Failed to kill process {pid}: access denied"
                )))
            }
        }
    }
}

impl ProcessControl for WindowsProcessControl {
    fn find_descendants(&self, pid: u32) -> Vec<u32> {
        self.table.descendants(pid)
    }

    fn kill(&self, pid: u32, force: bool) -> Result<KillOutcome> {
        if !self.table.is_alive(pid) {
            return Ok(KillOutcome::AlreadyExited);
        }
        if force {
            self.terminate_now(pid)
        } else {
            Self::request_close(pid)
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.table.is_alive(pid)
    }
}
