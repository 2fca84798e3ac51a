//! Process management for the Tandem supervisor
//!
//! This module launches the server processes and tears down their whole
//! process trees again. Spawning is shared across platforms; signalling and
//! process-table introspection sit behind the [`ProcessControl`] capability
//! with one implementation per target OS.
//!
//! ## Platform Support
//!
//! - **Unix**: children get their own session and process group (`setsid`),
//!   descendants are signalled individually and through the group
//! - **Windows**: children get a new process group; graceful termination uses
//!   `taskkill`, forceful termination kills each process in the tree
//!
//! ## Safety
//!
//! - Descendants are always signalled before their ancestors
//! - Both graceful and forceful termination are supported
//! - Signalling a process that already exited is never an error

pub mod launch;
pub mod terminate;
pub mod tree;

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

pub use launch::spawn;
pub use terminate::{KillOutcome, ProcessControl, TerminationReport, Terminator};
pub use tree::ProcessTable;

#[cfg(unix)]
pub use unix::UnixProcessControl as SystemProcessControl;

#[cfg(windows)]
pub use windows::WindowsProcessControl as SystemProcessControl;

use crate::{CoreError, Result};
use schema::LaunchMode;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Child;

/// Environment variables passed to a child, on top of the inherited environment
pub type EnvironmentMap = BTreeMap<String, String>;

/// Disposition of a child's stdout and stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    /// Share the host's console
    Inherit,
    /// Capture through pipes for forwarding into logs
    Piped,
}

/// Everything needed to start one server process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Name used in logs
    pub name: String,
    /// Program to execute
    pub command: String,
    /// Command-line arguments
    pub args: Vec<String>,
    /// Working directory for the child
    pub working_directory: PathBuf,
    /// Explicit variables; these win over inherited ones
    pub env: EnvironmentMap,
    /// Development or packaged run
    pub mode: LaunchMode,
}

impl LaunchSpec {
    /// Output handling for this launch
    ///
    /// Development servers print straight to the console; packaged servers
    /// have no console, so their output is captured.
    pub fn stdio(&self) -> StdioMode {
        match self.mode {
            LaunchMode::Development => StdioMode::Inherit,
            LaunchMode::Packaged => StdioMode::Piped,
        }
    }

    /// Program path handed to the OS
    ///
    /// Packaged executables live in the working directory, so a relative
    /// command is resolved against it. Development commands are looked up on
    /// `PATH` as given.
    pub fn program(&self) -> PathBuf {
        let command = Path::new(&self.command);
        match self.mode {
            LaunchMode::Packaged if command.is_relative() => self.working_directory.join(command),
            _ => command.to_path_buf(),
        }
    }
}

/// A spawned child process
///
/// Owns the OS handle and the child's piped streams. On Unix the process is
/// the leader of its own process group.
#[derive(Debug)]
pub struct ChildProcess {
    /// The process ID of the spawned process
    pid: u32,
    /// The underlying Child handle for waiting and status checking
    child: Child,
}

impl ChildProcess {
    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Get the process group ID (same as PID for session leaders)
    #[cfg(unix)]
    pub fn pgid(&self) -> u32 {
        self.pid
    }

    /// Wait for the process to exit and return its exit status (async)
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child.wait().await.map_err(|e| {
            CoreError::ProcessWait(format!("Failed to wait for process {}: {}", self.pid, e))
        })
    }

    /// Try to wait for the process to exit without blocking
    pub fn try_wait(&mut self) -> Result<Option<std::process::ExitStatus>> {
        self.child.try_wait().map_err(|e| {
            CoreError::ProcessWait(format!(
                "Failed to try_wait for process {}: {}",
                self.pid, e
            ))
        })
    }

    /// Take the stdout handle for async reading, if available
    pub fn take_stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the stderr handle for async reading, if available
    pub fn take_stderr(&mut self) -> Option<tokio::process::ChildStderr> {
        self.child.stderr.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(mode: LaunchMode, command: &str) -> LaunchSpec {
        LaunchSpec {
            name: "api".to_string(),
            command: command.to_string(),
            args: vec![],
            working_directory: PathBuf::from("/opt/app/resources/fastapi"),
            env: EnvironmentMap::new(),
            mode,
        }
    }

    #[test]
    fn test_stdio_follows_mode() {
        assert_eq!(spec(LaunchMode::Development, "python3").stdio(), StdioMode::Inherit);
        assert_eq!(spec(LaunchMode::Packaged, "fastapi").stdio(), StdioMode::Piped);
    }

    #[test]
    fn test_packaged_program_resolves_against_working_directory() {
        let packaged = spec(LaunchMode::Packaged, "fastapi");
        assert_eq!(
            packaged.program(),
            PathBuf::from("/opt/app/resources/fastapi/fastapi")
        );

        let dev = spec(LaunchMode::Development, "python3");
        assert_eq!(dev.program(), PathBuf::from("python3"));
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_packaged_program_is_kept() {
        let packaged = spec(LaunchMode::Packaged, "/usr/local/bin/fastapi");
        assert_eq!(packaged.program(), PathBuf::from("/usr/local/bin/fastapi"));
    }
}
