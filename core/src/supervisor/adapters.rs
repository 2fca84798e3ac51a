//! Process adapters for abstracting process management
//!
//! The orchestrator never touches the OS directly. It spawns through a
//! [`ProcessAdapter`] and holds the result as a [`ManagedProcess`], which
//! lets tests drive startup ordering and rollback with the mocks below
//! instead of real servers.

use crate::process::tree::post_order;
use crate::process::{spawn, ChildProcess, KillOutcome, LaunchSpec, ProcessControl};
use crate::{CoreError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncRead;
use tracing::debug;

/// Boxed output stream of a child process
pub type OutputStream = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Trait for launching processes in a platform-agnostic way
#[async_trait]
pub trait ProcessAdapter: Send + Sync {
    /// Spawn a new managed process according to the launch specification
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>>;
}

/// A launched process owned by the orchestrator
pub trait ManagedProcess: Send + Sync {
    /// Get the process ID
    fn pid(&self) -> u32;

    /// Whether the process has already exited (and was reaped)
    fn has_exited(&mut self) -> bool;

    /// Take a readable handle to the child's stdout for async consumption.
    /// Returns None if stdout was not piped or already taken.
    fn take_stdout(&mut self) -> Option<OutputStream>;

    /// Take a readable handle to the child's stderr for async consumption.
    /// Returns None if stderr was not piped or already taken.
    fn take_stderr(&mut self) -> Option<OutputStream>;
}

/// Adapter that spawns real OS processes
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemProcessAdapter;

impl SystemProcessAdapter {
    /// Create a new system process adapter
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessAdapter for SystemProcessAdapter {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>> {
        debug!("Spawning {}: {} {:?}", spec.name, spec.command, spec.args);
        let child = spawn(spec)?;
        Ok(Box::new(SystemManagedProcess { child }))
    }
}

/// Managed process backed by a real child
#[derive(Debug)]
struct SystemManagedProcess {
    child: ChildProcess,
}

impl ManagedProcess for SystemManagedProcess {
    fn pid(&self) -> u32 {
        self.child.pid()
    }

    fn has_exited(&mut self) -> bool {
        // try_wait also reaps the child, so a dead server never lingers as a zombie
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.child.take_stdout().map(|s| {
            let r: OutputStream = Box::pin(s);
            r
        })
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.child.take_stderr().map(|s| {
            let r: OutputStream = Box::pin(s);
            r
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct MockTable {
    children: HashMap<u32, Vec<u32>>,
    alive: HashSet<u32>,
    ignores_graceful: HashSet<u32>,
    denied: HashSet<u32>,
    groups: HashMap<u32, Vec<u32>>,
    kills: Vec<(u32, bool)>,
}

/// In-memory process table for testing termination
///
/// Processes are plain PIDs. A graceful kill removes a process unless it was
/// told to ignore graceful signals; a forceful kill always removes it unless
/// signalling it is denied.
#[derive(Debug, Default)]
pub struct MockProcessControl {
    table: Mutex<MockTable>,
}

impl MockProcessControl {
    /// Create an empty mock process table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `parent` and its `children` as running processes
    pub fn add_tree(&self, parent: u32, children: &[u32]) {
        let mut table = lock(&self.table);
        table.alive.insert(parent);
        table.alive.extend(children.iter().copied());
        table
            .children
            .entry(parent)
            .or_default()
            .extend(children.iter().copied());
    }

    /// Register a running member of process group `pgid` that is not
    /// reachable through parent links
    pub fn add_group_member(&self, pgid: u32, pid: u32) {
        let mut table = lock(&self.table);
        table.alive.insert(pid);
        table.groups.entry(pgid).or_default().push(pid);
    }

    /// Make `pid` survive graceful termination
    pub fn ignore_graceful(&self, pid: u32) {
        lock(&self.table).ignores_graceful.insert(pid);
    }

    /// Make every signal to `pid` fail with a permission error
    pub fn deny(&self, pid: u32) {
        lock(&self.table).denied.insert(pid);
    }

    /// Simulate `pid` exiting on its own
    pub fn exit(&self, pid: u32) {
        lock(&self.table).alive.remove(&pid);
    }

    /// Every `kill` request so far as `(pid, force)`, in order
    pub fn kill_order(&self) -> Vec<(u32, bool)> {
        lock(&self.table).kills.clone()
    }

    /// Number of processes still running
    pub fn running(&self) -> usize {
        lock(&self.table).alive.len()
    }
}

impl ProcessControl for MockProcessControl {
    fn find_descendants(&self, pid: u32) -> Vec<u32> {
        let table = lock(&self.table);
        post_order(pid, &table.children)
            .into_iter()
            .filter(|p| table.alive.contains(p))
            .collect()
    }

    fn kill(&self, pid: u32, force: bool) -> Result<KillOutcome> {
        let mut table = lock(&self.table);
        table.kills.push((pid, force));
        if !table.alive.contains(&pid) {
            return Ok(KillOutcome::AlreadyExited);
        }
        if table.denied.contains(&pid) {
            return Err(CoreError::ProcessSignal(format!(
                "Permission denied signalling process {pid}"
            )));
        }
        if force || !table.ignores_graceful.contains(&pid) {
            table.alive.remove(&pid);
        }
        Ok(KillOutcome::Signalled)
    }

    fn kill_group(&self, pgid: u32, force: bool) -> Result<KillOutcome> {
        let mut table = lock(&self.table);
        let members: Vec<u32> = table
            .groups
            .get(&pgid)
            .map(|m| m.iter().copied().filter(|p| table.alive.contains(p)).collect())
            .unwrap_or_default();
        if members.is_empty() {
            return Ok(KillOutcome::AlreadyExited);
        }
        for member in members {
            if force || !table.ignores_graceful.contains(&member) {
                table.alive.remove(&member);
            }
        }
        Ok(KillOutcome::Signalled)
    }

    fn is_alive(&self, pid: u32) -> bool {
        lock(&self.table).alive.contains(&pid)
    }

    fn group_alive(&self, pgid: u32) -> bool {
        let table = lock(&self.table);
        table
            .groups
            .get(&pgid)
            .is_some_and(|m| m.iter().any(|p| table.alive.contains(p)))
    }
}

/// Managed process living in a [`MockProcessControl`] table
#[derive(Debug)]
pub struct MockProcess {
    pid: u32,
    control: Arc<MockProcessControl>,
    stdout: Option<Vec<u8>>,
}

impl MockProcess {
    /// Wrap `pid`, which should already be registered in `control`
    pub fn new(pid: u32, control: Arc<MockProcessControl>) -> Self {
        Self {
            pid,
            control,
            stdout: None,
        }
    }

    /// Give the process canned stdout
    pub fn with_stdout(mut self, output: impl Into<Vec<u8>>) -> Self {
        self.stdout = Some(output.into());
        self
    }
}

impl ManagedProcess for MockProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn has_exited(&mut self) -> bool {
        !self.control.is_alive(self.pid)
    }

    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take().map(|bytes| {
            let r: OutputStream = Box::pin(std::io::Cursor::new(bytes));
            r
        })
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        None
    }
}

/// Mock process adapter for testing
///
/// Every spawn registers a new process (plus `forks` children) in the shared
/// [`MockProcessControl`] and records the launch spec.
#[derive(Debug)]
pub struct MockProcessAdapter {
    control: Arc<MockProcessControl>,
    next_pid: AtomicU32,
    forks: usize,
    failing: Mutex<HashSet<String>>,
    stdout: Mutex<HashMap<String, String>>,
    launched: Mutex<Vec<LaunchSpec>>,
}

impl MockProcessAdapter {
    /// Create an adapter spawning into `control`
    pub fn new(control: Arc<MockProcessControl>) -> Self {
        Self {
            control,
            next_pid: AtomicU32::new(10_000),
            forks: 0,
            failing: Mutex::new(HashSet::new()),
            stdout: Mutex::new(HashMap::new()),
            launched: Mutex::new(Vec::new()),
        }
    }

    /// Give every spawned process `forks` child processes
    pub fn with_forks(mut self, forks: usize) -> Self {
        self.forks = forks;
        self
    }

    /// Make spawning the launch named `name` fail
    pub fn fail_launch(&self, name: &str) {
        lock(&self.failing).insert(name.to_string());
    }

    /// Canned stdout for the launch named `name`
    pub fn set_stdout(&self, name: &str, output: &str) {
        lock(&self.stdout).insert(name.to_string(), output.to_string());
    }

    /// Specs of every attempted launch, in order
    pub fn launched(&self) -> Vec<LaunchSpec> {
        lock(&self.launched).clone()
    }

    /// Names of every attempted launch, in order
    pub fn launched_names(&self) -> Vec<String> {
        lock(&self.launched).iter().map(|s| s.name.clone()).collect()
    }
}

#[async_trait]
impl ProcessAdapter for MockProcessAdapter {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>> {
        debug!("Spawning mock process for {}", spec.name);
        lock(&self.launched).push(spec.clone());

        if lock(&self.failing).contains(&spec.name) {
            return Err(CoreError::ProcessSpawn(format!(
                "Failed to spawn '{}': No such file or directory",
                spec.command
            )));
        }

        let span = u32::try_from(self.forks + 1).unwrap_or(1);
        let pid = self.next_pid.fetch_add(span, Ordering::Relaxed);
        let children: Vec<u32> = (1..span).map(|i| pid + i).collect();
        self.control.add_tree(pid, &children);

        let mut process = MockProcess::new(pid, self.control.clone());
        if let Some(output) = lock(&self.stdout).get(&spec.name) {
            process = process.with_stdout(output.clone());
        }
        Ok(Box::new(process))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::EnvironmentMap;
    use schema::LaunchMode;
    use tokio::io::AsyncReadExt;

    fn spec(name: &str) -> LaunchSpec {
        LaunchSpec {
            name: name.to_string(),
            command: "server".to_string(),
            args: vec![],
            working_directory: std::env::temp_dir(),
            env: EnvironmentMap::new(),
            mode: LaunchMode::Packaged,
        }
    }

    #[tokio::test]
    async fn test_mock_adapter_spawn_registers_tree() {
        let control = Arc::new(MockProcessControl::new());
        let adapter = MockProcessAdapter::new(control.clone()).with_forks(2);

        let mut process = adapter.spawn(&spec("api")).await.expect("spawn");
        assert!(!process.has_exited());
        assert_eq!(control.running(), 3);
        assert_eq!(control.find_descendants(process.pid()).len(), 2);

        control.exit(process.pid());
        assert!(process.has_exited());
    }

    #[tokio::test]
    async fn test_mock_adapter_failure_is_recorded() {
        let control = Arc::new(MockProcessControl::new());
        let adapter = MockProcessAdapter::new(control.clone());
        adapter.fail_launch("web");

        assert!(adapter.spawn(&spec("api")).await.is_ok());
        let err = adapter.spawn(&spec("web")).await.err().expect("web fails");
        assert!(matches!(err, CoreError::ProcessSpawn(_)));
        assert_eq!(adapter.launched_names(), vec!["api", "web"]);
        assert_eq!(control.running(), 1);
    }

    #[tokio::test]
    async fn test_mock_process_stdout() {
        let control = Arc::new(MockProcessControl::new());
        let adapter = MockProcessAdapter::new(control);
        adapter.set_stdout("api", "hello\n");

        let mut process = adapter.spawn(&spec("api")).await.expect("spawn");
        let mut out = String::new();
        process
            .take_stdout()
            .expect("canned stdout")
            .read_to_string(&mut out)
            .await
            .expect("read");
        assert_eq!(out, "hello\n");
        assert!(process.take_stdout().is_none());
        assert!(process.take_stderr().is_none());
    }

    #[test]
    fn test_mock_control_kill_semantics() {
        let control = MockProcessControl::new();
        control.add_tree(1, &[2, 3]);
        control.ignore_graceful(2);
        control.deny(3);

        assert_eq!(control.kill(2, false).expect("graceful"), KillOutcome::Signalled);
        assert!(control.is_alive(2));
        assert_eq!(control.kill(2, true).expect("force"), KillOutcome::Signalled);
        assert!(!control.is_alive(2));
        assert_eq!(control.kill(2, true).expect("gone"), KillOutcome::AlreadyExited);

        assert!(control.kill(3, true).is_err());
        assert!(control.is_alive(3));
        assert_eq!(control.kill_order(), vec![(2, false), (2, true), (2, true), (3, true)]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_adapter_reports_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut launch = spec("short");
        launch.command = "/bin/sh".to_string();
        launch.args = vec!["-c".to_string(), "exit 0".to_string()];
        launch.working_directory = dir.path().to_path_buf();

        let mut process = SystemProcessAdapter::new()
            .spawn(&launch)
            .await
            .expect("spawn sh");
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !process.has_exited() {
            assert!(std::time::Instant::now() < deadline, "sh did not exit");
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }
}
