//! Unix process management with process groups and per-process signals
//!
//! Every server is spawned into its own session and process group via
//! `setsid()`. Termination then works on two levels:
//!
//! - each descendant found in the process table is signalled by PID, which
//!   also reaches workers that moved to another process group
//! - the server's process group is signalled as a whole, which also reaches
//!   group members that were re-parented after their parent exited
//!
//! SIGTERM is used for graceful termination, SIGKILL for forceful termination.
//!
//! ## Process Groups
//!
//! When a process calls `setsid()`, it:
//! - Creates a new session and becomes the session leader
//! - Creates a new process group and becomes the process group leader
//! - Has no controlling terminal
//!
//! This allows us to signal the entire process tree by sending signals to the
//! negative process ID (which targets the process group).

// Allow unsafe code for this module since process management requires libc::setsid() calls
#![allow(unsafe_code)]

use super::terminate::{KillOutcome, ProcessControl};
use super::tree::ProcessTable;
use crate::{CoreError, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, error};

/// Put the child into a new session and process group before `exec`
pub(crate) fn configure_command(command: &mut Command) {
    // Safety: setsid() is async-signal-safe and appropriate for use in pre_exec
    #[deny(unsafe_op_in_unsafe_fn)]
    unsafe {
        command.pre_exec(|| {
            // Create a new session and process group
            let result = libc::setsid();
            if result == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

fn to_pid(pid: u32) -> Result<Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(Pid::from_raw)
        .ok_or_else(|| CoreError::ValidationError(format!("invalid pid {pid}")))
}

fn signal_for(force: bool) -> Signal {
    if force {
        Signal::SIGKILL
    } else {
        Signal::SIGTERM
    }
}

/// Map the result of `kill`/`killpg` onto a [`KillOutcome`]
///
/// - `ESRCH` (No such process) means the target already exited
/// - `EPERM` means the target exists but may not be signalled by us
fn interpret(target: &str, signal: Signal, result: nix::Result<()>) -> Result<KillOutcome> {
    match result {
        Ok(()) => {
            debug!("Sent {} to {}", signal, target);
            Ok(KillOutcome::Signalled)
        }
        Err(Errno::ESRCH) => {
            debug!("{} already exited", target);
            Ok(KillOutcome::AlreadyExited)
        }
        Err(Errno::EPERM) => {
            error!("Permission denied sending {} to {}", signal, target);
            Err(CoreError::ProcessSignal(format!(
                "Permission denied sending {} to {}",
                signal, target
            )))
        }
        Err(e) => {
            error!("Failed to send {} to {}: {}", signal, target, e);
            Err(CoreError::ProcessSignal(format!(
                "Failed to send {} to {}: {}",
                signal, target, e
            )))
        }
    }
}

/// Send SIGTERM (graceful) or SIGKILL (forceful) to a single process
///
/// # Errors
///
/// Returns [`CoreError::ProcessSignal`] if the process is alive but the OS
/// refuses the signal.
pub fn signal_process(pid: u32, force: bool) -> Result<KillOutcome> {
    let signal = signal_for(force);
    let target = to_pid(pid)?;
    interpret(&format!("process {pid}"), signal, kill(target, signal))
}

/// Send SIGTERM (graceful) or SIGKILL (forceful) to a whole process group
///
/// An empty or vanished group is reported as [`KillOutcome::AlreadyExited`].
///
/// # Errors
///
/// Returns [`CoreError::ProcessSignal`] if a group member is alive but the OS
/// refuses the signal.
pub fn signal_group(pgid: u32, force: bool) -> Result<KillOutcome> {
    let signal = signal_for(force);
    let target = to_pid(pgid)?;
    interpret(&format!("process group {pgid}"), signal, killpg(target, signal))
}

/// [`ProcessControl`] for Unix: `nix` signals plus the shared process table
#[derive(Debug, Default)]
pub struct UnixProcessControl {
    table: ProcessTable,
}

impl UnixProcessControl {
    /// Create a new Unix process control
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessControl for UnixProcessControl {
    fn find_descendants(&self, pid: u32) -> Vec<u32> {
        self.table.descendants(pid)
    }

    fn kill(&self, pid: u32, force: bool) -> Result<KillOutcome> {
        signal_process(pid, force)
    }

    fn kill_group(&self, pgid: u32, force: bool) -> Result<KillOutcome> {
        signal_group(pgid, force)
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.table.is_alive(pid)
    }

    fn group_alive(&self, pgid: u32) -> bool {
        let Ok(target) = to_pid(pgid) else {
            return false;
        };
        match killpg(target, None) {
            Err(Errno::ESRCH) => false,
            // Zombies keep the group non-empty until they are reaped. Servers
            // run as session leaders, so the group's members are the live
            // processes of that session.
            _ => self.table.session_alive(pgid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNUSED_PID: u32 = i32::MAX as u32 - 1;

    #[test]
    fn test_signal_nonexistent_process() {
        // No kernel hands out PIDs this high, so nothing can own them
        let outcome = signal_process(UNUSED_PID, false).expect("ESRCH is success");
        assert_eq!(outcome, KillOutcome::AlreadyExited);

        let outcome = signal_process(UNUSED_PID, true).expect("ESRCH is success");
        assert_eq!(outcome, KillOutcome::AlreadyExited);
    }

    #[test]
    fn test_signal_nonexistent_group() {
        let outcome = signal_group(UNUSED_PID, true).expect("ESRCH is success");
        assert_eq!(outcome, KillOutcome::AlreadyExited);
    }

    #[test]
    fn test_vanished_group_is_not_alive() {
        let control = UnixProcessControl::new();
        assert!(!control.group_alive(UNUSED_PID));
        assert!(!control.group_alive(0));
    }

    #[test]
    fn test_invalid_pid_rejected() {
        assert!(matches!(
            signal_process(0, false),
            Err(CoreError::ValidationError(_))
        ));
        assert!(signal_group(u32::MAX, false).is_err());
    }
}
