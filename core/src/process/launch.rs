//! Spawning server processes
//!
//! [`spawn`] starts the child and returns as soon as the OS has created it.
//! It never waits for the server to accept connections.

use super::{ChildProcess, LaunchSpec, StdioMode};
use crate::{CoreError, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Spawn a server process described by `spec`
///
/// The child inherits the parent's environment overlaid with `spec.env`,
/// runs in `spec.working_directory`, and gets a null stdin. On Unix it is
/// placed in a new session and process group so the whole tree can be
/// signalled later.
///
/// ## Example
///
/// ```rust,no_run
/// use tandem_core::process::{spawn, EnvironmentMap, LaunchSpec};
/// use schema::LaunchMode;
///
/// # async fn example() -> tandem_core::Result<()> {
/// let spec = LaunchSpec {
///     name: "api".to_string(),
///     command: "python3".to_string(),
///     args: vec!["server.py".to_string()],
///     working_directory: "servers/fastapi".into(),
///     env: EnvironmentMap::new(),
///     mode: LaunchMode::Development,
/// };
/// let child = spawn(&spec)?;
/// println!("Spawned process with PID: {}", child.pid());
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns [`CoreError::ProcessSpawn`] if the working directory or executable
/// is missing, or the OS refuses to create the process.
pub fn spawn(spec: &LaunchSpec) -> Result<ChildProcess> {
    let program = spec.program();
    debug!(
        "Spawning {}: {} {:?} in {}",
        spec.name,
        program.display(),
        spec.args,
        spec.working_directory.display()
    );

    if !spec.working_directory.is_dir() {
        error!(
            "Working directory for {} does not exist: {}",
            spec.name,
            spec.working_directory.display()
        );
        return Err(CoreError::ProcessSpawn(format!(
            "Working directory {} for '{}' does not exist",
            spec.working_directory.display(),
            spec.name
        )));
    }

    let mut command = Command::new(&program);
    command
        .args(&spec.args)
        .current_dir(&spec.working_directory)
        .envs(&spec.env)
        .stdin(Stdio::null());

    match spec.stdio() {
        StdioMode::Inherit => {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        StdioMode::Piped => {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
    }

    #[cfg(unix)]
    super::unix::configure_command(&mut command);
    #[cfg(windows)]
    super::windows::configure_command(&mut command);

    let child = command.spawn().map_err(|e| {
        error!("Failed to spawn '{}': {}", program.display(), e);
        CoreError::ProcessSpawn(format!("Failed to spawn '{}': {}", program.display(), e))
    })?;

    // tokio::process::Child::id() returns None once the child has been reaped
    let pid = child
        .id()
        .ok_or_else(|| CoreError::ProcessSpawn("Spawned child did not have a PID".to_string()))?;
    info!("Spawned {} (pid {})", spec.name, pid);

    Ok(ChildProcess { pid, child })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::EnvironmentMap;
    use schema::LaunchMode;
    use tokio::io::AsyncReadExt;

    fn sh_spec(script: &str, dir: &std::path::Path) -> LaunchSpec {
        LaunchSpec {
            name: "test".to_string(),
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            working_directory: dir.to_path_buf(),
            env: EnvironmentMap::new(),
            mode: LaunchMode::Packaged,
        }
    }

    #[tokio::test]
    async fn test_spawn_and_wait() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut child = spawn(&sh_spec("exit 0", dir.path())).expect("Failed to spawn sh");
        assert!(child.pid() > 0);
        assert_eq!(child.pid(), child.pgid());
        let status = child.wait().await.expect("Failed to wait for process");
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_explicit_env_overrides_inherited() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut spec = sh_spec("printf '%s|%s' \"$PORT\" \"$PATH\"", dir.path());
        spec.env.insert("PORT".to_string(), "51342".to_string());

        let mut child = spawn(&spec).expect("spawn");
        let mut stdout = child.take_stdout().expect("stdout is piped in packaged mode");
        let mut out = String::new();
        stdout.read_to_string(&mut out).await.expect("read stdout");
        child.wait().await.expect("wait");

        let (port, path) = out.split_once('|').expect("two fields");
        assert_eq!(port, "51342");
        // PATH is inherited even though it is not listed explicitly
        assert!(!path.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut spec = sh_spec("", dir.path());
        spec.command = "nonexistent_command_12345".to_string();
        spec.mode = LaunchMode::Development;

        match spawn(&spec) {
            Err(CoreError::ProcessSpawn(_)) => {}
            Err(e) => panic!("Expected ProcessSpawn error, got: {}", e),
            Ok(_) => panic!("spawn of a missing command should fail"),
        }
    }

    #[tokio::test]
    async fn test_spawn_missing_working_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = sh_spec("exit 0", &dir.path().join("does-not-exist"));

        let err = spawn(&spec).expect_err("missing directory should fail");
        assert!(matches!(err, CoreError::ProcessSpawn(_)));
    }

    #[tokio::test]
    async fn test_packaged_relative_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let exe = dir.path().join("server-bin");
        std::fs::write(&exe, "#!/bin/sh\nexit 3\n").expect("write script");
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).expect("chmod");

        let mut spec = sh_spec("", dir.path());
        spec.command = "server-bin".to_string();
        spec.args.clear();

        let mut child = spawn(&spec).expect("packaged executable resolves in its directory");
        let status = child.wait().await.expect("wait");
        assert_eq!(status.code(), Some(3));
    }
}
