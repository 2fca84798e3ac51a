//! Configuration loading, validation and resolution for Tandem
//!
//! This module parses a TOML file into `schema::TandemConfig`, performs strict
//! validation with field-path error messages, and resolves the result against
//! the on-disk [`Layout`] into the [`OrchestratorConfig`] the orchestrator runs
//! from.

use crate::process::{EnvironmentMap, LaunchSpec};
use crate::supervisor::env::{Secrets, ServerContext};
use crate::{CoreError, Result};
use schema::*;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the launch mode
pub const MODE_ENV: &str = "TANDEM_MODE";

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "TANDEM_DATA_DIR";

/// Directory under the user's home used when no data directory is configured
pub const DEFAULT_DATA_DIR_NAME: &str = ".tandem";

/// File name of the per-user configuration inside the data directory
pub const USER_CONFIG_FILE: &str = "userConfig.json";

/// Load a configuration file from a TOML path
pub fn load_config_from_toml_path(path: impl AsRef<Path>) -> Result<TandemConfig> {
    let data = fs::read_to_string(&path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_config_from_toml_str(&data)
}

/// Load a configuration file from a TOML string
pub fn load_config_from_toml_str(input: &str) -> Result<TandemConfig> {
    let cfg: TandemConfig = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Validate the configuration and return `Result<()>` with field-path errors
pub fn validate_config(cfg: &TandemConfig) -> Result<()> {
    for (field, value) in [("baseDir", &cfg.base_dir), ("dataDir", &cfg.data_dir)] {
        if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(CoreError::ValidationError(format!(
                "{field}: cannot be empty"
            )));
        }
    }

    for role in ServerRole::ALL {
        validate_section(role, cfg.section(role))?;
    }

    if let (Some(api), Some(web)) = (cfg.api.port, cfg.web.port) {
        if api == web {
            return Err(CoreError::ValidationError(format!(
                "web.port: must differ from api.port ({api})"
            )));
        }
    }

    if cfg.shutdown.kill_wait_ms == 0 {
        return Err(CoreError::ValidationError(
            "shutdown.killWaitMs: must be > 0".to_string(),
        ));
    }
    if cfg.readiness.timeout_secs == 0 {
        return Err(CoreError::ValidationError(
            "readiness.timeoutSecs: must be > 0".to_string(),
        ));
    }
    if cfg.readiness.interval_ms == 0 {
        return Err(CoreError::ValidationError(
            "readiness.intervalMs: must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_section(role: ServerRole, section: &ServerSection) -> Result<()> {
    if section.port == Some(0) {
        return Err(CoreError::ValidationError(format!(
            "{role}.port: must be 1..=65535"
        )));
    }
    for (field, dir) in [
        ("devDirectory", &section.dev_directory),
        ("packagedDirectory", &section.packaged_directory),
    ] {
        if dir.as_deref().is_some_and(|d| d.trim().is_empty()) {
            return Err(CoreError::ValidationError(format!(
                "{role}.{field}: cannot be empty"
            )));
        }
    }
    for (field, command) in [("dev", &section.dev), ("packaged", &section.packaged)] {
        if let Some(command) = command {
            if command.command.trim().is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "{role}.{field}.command: cannot be empty"
                )));
            }
        }
    }
    Ok(())
}

/// Where the servers and their shared data live on disk
///
/// ```text
/// development: <base>/servers/fastapi, <base>/servers/nextjs
/// packaged:    <base>/resources/fastapi, <base>/resources/nextjs
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Development or packaged run
    pub mode: LaunchMode,
    /// Source checkout (development) or install directory (packaged)
    pub base_dir: PathBuf,
    /// Bundled resources, `<base>/resources`
    pub resources_dir: PathBuf,
    /// Per-user application data
    pub data_dir: PathBuf,
    /// Scratch space shared with the servers
    pub temp_dir: PathBuf,
}

impl Layout {
    /// Lay out the directories below `base_dir`
    pub fn new(mode: LaunchMode, base_dir: PathBuf, data_dir: PathBuf, temp_dir: PathBuf) -> Self {
        Self {
            mode,
            resources_dir: base_dir.join("resources"),
            base_dir,
            data_dir,
            temp_dir,
        }
    }

    /// Working directory of a server in this layout
    pub fn server_directory(&self, server: &ServerConfig) -> PathBuf {
        let relative = server.directory_for(self.mode);
        match self.mode {
            LaunchMode::Development => self.base_dir.join(relative),
            LaunchMode::Packaged => self.resources_dir.join(relative),
        }
    }

    /// Location of the per-user configuration file
    pub fn user_config_path(&self) -> PathBuf {
        self.data_dir.join(USER_CONFIG_FILE)
    }
}

/// Base directory used when none is configured
///
/// Development runs from the current directory (the source checkout);
/// packaged runs from the directory holding the executable.
pub fn default_base_dir(mode: LaunchMode) -> Result<PathBuf> {
    match mode {
        LaunchMode::Development => Ok(std::env::current_dir()?),
        LaunchMode::Packaged => {
            let exe = std::env::current_exe()?;
            exe.parent().map(Path::to_path_buf).ok_or_else(|| {
                CoreError::ConfigurationError(format!(
                    "Executable path {} has no parent directory",
                    exe.display()
                ))
            })
        }
    }
}

/// Data directory used when none is configured: `~/.tandem`
pub fn default_data_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(DEFAULT_DATA_DIR_NAME))
        .ok_or_else(|| {
            CoreError::ConfigurationError(format!(
                "Cannot determine a home directory; set {DATA_DIR_ENV} or dataDir"
            ))
        })
}

/// One server, resolved against the layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLaunch {
    /// Which server this is
    pub role: ServerRole,
    /// Directory the server runs in
    pub working_directory: PathBuf,
    /// Command line for the active mode
    pub command: CommandSpec,
    /// Port tried before falling back to an OS-assigned one
    pub preferred_port: Option<u16>,
}

impl ServerLaunch {
    /// Resolve a server for `layout`
    pub fn resolve(role: ServerRole, server: &ServerConfig, layout: &Layout) -> Self {
        Self {
            role,
            working_directory: layout.server_directory(server),
            command: server.command_for(layout.mode).clone(),
            preferred_port: server.port,
        }
    }

    /// Launch specification for a run on `port`
    pub fn to_spec(&self, mode: LaunchMode, port: u16, env: EnvironmentMap) -> LaunchSpec {
        LaunchSpec {
            name: self.role.as_str().to_string(),
            command: self.command.command.clone(),
            args: self.command.render_args(port),
            working_directory: self.working_directory.clone(),
            env,
            mode,
        }
    }
}

/// Everything the orchestrator needs for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Facts shared by both servers
    pub context: ServerContext,
    /// The API server
    pub api: ServerLaunch,
    /// The web frontend server
    pub web: ServerLaunch,
    /// Termination timing
    pub shutdown: ShutdownConfig,
    /// Readiness wait
    pub readiness: ReadinessConfig,
}

impl OrchestratorConfig {
    /// Resolve a configuration file against a layout
    pub fn resolve(cfg: &TandemConfig, layout: &Layout, secrets: Secrets) -> Self {
        Self {
            context: ServerContext {
                mode: layout.mode,
                app_data_dir: layout.data_dir.clone(),
                temp_dir: layout.temp_dir.clone(),
                user_config_path: layout.user_config_path(),
                secrets,
            },
            api: ServerLaunch::resolve(ServerRole::Api, &cfg.server(ServerRole::Api), layout),
            web: ServerLaunch::resolve(ServerRole::Web, &cfg.server(ServerRole::Web), layout),
            shutdown: cfg.shutdown,
            readiness: cfg.readiness,
        }
    }

    /// Launch settings for a role
    pub fn server(&self, role: ServerRole) -> &ServerLaunch {
        match role {
            ServerRole::Api => &self.api,
            ServerRole::Web => &self.web,
        }
    }
}
