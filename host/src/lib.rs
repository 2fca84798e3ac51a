//! Tandem host library
//!
//! The host resolves where the servers live, hands that to a
//! [`tandem_core::Orchestrator`], and keeps both servers running until it is
//! told to shut down. The `tandem` binary is a thin clap front end over
//! [`resolve_config`] and [`serve`].

pub mod error;

pub use error::{HostError, Result};

use schema::{LaunchMode, ServerRole, TandemConfig};
use std::future::Future;
use std::path::{Path, PathBuf};
use tandem_core::config::{
    default_base_dir, default_data_dir, load_config_from_toml_path, Layout,
};
use tandem_core::supervisor::localhost_url;
use tandem_core::{Orchestrator, OrchestratorConfig, Secrets, StartedServers};
use tracing::{info, warn};

/// Settings that came from the command line or its environment fallbacks
///
/// Anything left as `None` is taken from the configuration file, then from
/// the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostOptions {
    /// TOML configuration file
    pub config: Option<PathBuf>,
    /// Launch mode
    pub mode: Option<LaunchMode>,
    /// Directory holding `servers/` or `resources/`
    pub base_dir: Option<PathBuf>,
    /// Per-user application data directory
    pub data_dir: Option<PathBuf>,
    /// Wait for both servers to accept connections after launching them
    pub wait_ready: bool,
}

/// Load the configuration file, or the defaults when there is none
pub fn load_config(path: Option<&Path>) -> Result<TandemConfig> {
    match path {
        Some(path) => load_config_from_toml_path(path)
            .map_err(|e| HostError::ConfigError(format!("{}: {}", path.display(), e))),
        None => Ok(TandemConfig::default()),
    }
}

/// Merge command line, configuration file and defaults into one run
pub fn resolve_config(
    options: &HostOptions,
    file: &TandemConfig,
    secrets: Secrets,
) -> Result<OrchestratorConfig> {
    let mode = options.mode.or(file.mode).unwrap_or_default();

    let base_dir = match non_empty("--base-dir", options.base_dir.as_deref())?
        .or_else(|| file.base_dir.as_deref().map(PathBuf::from))
    {
        Some(dir) => dir,
        None => default_base_dir(mode)?,
    };
    let data_dir = match non_empty("--data-dir", options.data_dir.as_deref())?
        .or_else(|| file.data_dir.as_deref().map(PathBuf::from))
    {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    let layout = Layout::new(mode, base_dir, data_dir, std::env::temp_dir());
    info!(
        "Running in {} mode from {} (data: {})",
        mode,
        layout.base_dir.display(),
        layout.data_dir.display()
    );
    Ok(OrchestratorConfig::resolve(file, &layout, secrets))
}

fn non_empty(flag: &str, path: Option<&Path>) -> Result<Option<PathBuf>> {
    match path {
        Some(p) if p.as_os_str().is_empty() => Err(HostError::InvalidArgument(format!(
            "{flag}: cannot be empty"
        ))),
        other => Ok(other.map(Path::to_path_buf)),
    }
}

/// Run both servers until `shutdown` completes
///
/// Launches the servers, optionally waits until they accept connections,
/// then waits for `shutdown` and stops them. The servers are always stopped
/// before this returns, including on error.
///
/// # Errors
///
/// [`HostError::StartupFailed`] if the servers could not be launched, or
/// [`HostError::NotReady`] if they did not accept connections in time.
pub async fn serve<F>(
    orchestrator: &mut Orchestrator,
    wait_ready: bool,
    shutdown: F,
) -> Result<StartedServers>
where
    F: Future<Output = ()>,
{
    std::fs::create_dir_all(&orchestrator.config().context.app_data_dir)?;

    let started = match orchestrator.start().await {
        Ok(started) => started,
        Err(e) => {
            log_recent_output(orchestrator);
            return Err(HostError::StartupFailed(e));
        }
    };

    tokio::pin!(shutdown);

    if wait_ready {
        let deadline = orchestrator.config().readiness.timeout();
        let ready = tokio::select! {
            result = orchestrator.wait_ready(deadline) => Some(result),
            _ = &mut shutdown => None,
        };
        match ready {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                log_recent_output(orchestrator);
                orchestrator.stop_servers().await;
                return Err(HostError::NotReady(e));
            }
            None => {
                info!("Shutdown requested before the servers were ready");
                orchestrator.stop_servers().await;
                return Ok(started);
            }
        }
    }

    info!(
        "Frontend available at {} (API at {})",
        localhost_url(started.ports.web()),
        localhost_url(started.ports.api())
    );

    shutdown.await;
    info!("Shutdown requested, stopping servers");
    orchestrator.stop_servers().await;
    Ok(started)
}

/// Replay what the servers printed, for diagnosing a failed start
fn log_recent_output(orchestrator: &Orchestrator) {
    for role in ServerRole::ALL {
        for entry in orchestrator.recent_output(role) {
            warn!("[{} {}] {}", role, entry.stream.as_str(), entry.content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn options(base: &str, data: &str) -> HostOptions {
        HostOptions {
            base_dir: Some(PathBuf::from(base)),
            data_dir: Some(PathBuf::from(data)),
            ..HostOptions::default()
        }
    }

    #[test]
    fn test_command_line_wins_over_file() {
        let file = TandemConfig {
            mode: Some(LaunchMode::Packaged),
            base_dir: Some("/from/file".to_string()),
            data_dir: Some("/data/from/file".to_string()),
            ..TandemConfig::default()
        };
        let opts = HostOptions {
            mode: Some(LaunchMode::Development),
            ..options("/from/cli", "/data/from/cli")
        };

        let config = resolve_config(&opts, &file, Secrets::default()).expect("resolve");

        assert_eq!(config.context.mode, LaunchMode::Development);
        assert_eq!(config.context.app_data_dir, PathBuf::from("/data/from/cli"));
        assert_eq!(
            config.api.working_directory,
            PathBuf::from("/from/cli/servers/fastapi")
        );
    }

    #[test]
    fn test_file_fills_what_command_line_leaves_out() {
        let file = TandemConfig {
            mode: Some(LaunchMode::Packaged),
            base_dir: Some("/opt/tandem".to_string()),
            data_dir: Some("/var/tandem".to_string()),
            ..TandemConfig::default()
        };

        let config =
            resolve_config(&HostOptions::default(), &file, Secrets::default()).expect("resolve");

        assert_eq!(config.context.mode, LaunchMode::Packaged);
        assert_eq!(
            config.web.working_directory,
            PathBuf::from("/opt/tandem/resources/nextjs")
        );
        assert_eq!(
            config.context.user_config_path,
            PathBuf::from("/var/tandem/userConfig.json")
        );
    }

    #[test]
    fn test_empty_base_dir_rejected() {
        let opts = options("", "/data");
        let err = resolve_config(&opts, &TandemConfig::default(), Secrets::default())
            .expect_err("empty base dir");
        assert!(matches!(err, HostError::InvalidArgument(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_secrets_reach_the_config() {
        let secrets = Secrets {
            google_api_key: Some("g-key".to_string()),
            ..Secrets::default()
        };
        let config = resolve_config(
            &options("/base", "/data"),
            &TandemConfig::default(),
            secrets.clone(),
        )
        .expect("resolve");
        assert_eq!(config.context.secrets, secrets);
    }

    #[test]
    fn test_load_config_without_file_uses_defaults() {
        assert_eq!(load_config(None).expect("defaults"), TandemConfig::default());
    }

    #[test]
    fn test_load_config_reports_bad_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[api]\nport = 0").expect("write");

        let err = load_config(Some(file.path())).expect_err("port 0 is invalid");
        assert!(matches!(err, HostError::ConfigError(_)));
        assert!(err.to_string().contains("api.port"), "{err}");
    }

    #[test]
    fn test_load_config_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "mode = \"packaged\"\n[readiness]\ntimeoutSecs = 5").expect("write");

        let cfg = load_config(Some(file.path())).expect("load");
        assert_eq!(cfg.mode, Some(LaunchMode::Packaged));
        assert_eq!(cfg.readiness.timeout_secs, 5);
    }
}
