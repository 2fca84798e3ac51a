//! Server roles, launch modes and lifecycle states for the Tandem supervisor
//!
//! The supervisor always manages exactly two servers:
//! - `Api`: the backend HTTP API, launched first
//! - `Web`: the web frontend, launched second and wired to the API's port
//!
//! ## Orchestrator Lifecycle
//!
//! ```text
//! Idle → PortsAllocated → Starting → Running → Stopping → Stopped
//! ```
//!
//! Any failure moves the orchestrator straight to `Stopped`, which is terminal.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Placeholder substituted with the server's allocated port in command arguments
pub const PORT_PLACEHOLDER: &str = "{port}";

/// How the host application is being run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum LaunchMode {
    /// Servers run from editable source through their development runtimes
    Development,
    /// Servers run as pre-built executables shipped in the resources directory
    Packaged,
}

impl LaunchMode {
    /// Whether this is a development run
    pub fn is_development(self) -> bool {
        matches!(self, LaunchMode::Development)
    }

    /// Value exported to the API server as its `DEBUG` flag
    pub fn debug_flag(self) -> &'static str {
        match self {
            LaunchMode::Development => "True",
            LaunchMode::Packaged => "False",
        }
    }

    /// Lowercase name of the mode
    pub fn as_str(self) -> &'static str {
        match self {
            LaunchMode::Development => "development",
            LaunchMode::Packaged => "packaged",
        }
    }
}

impl Default for LaunchMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            LaunchMode::Development
        } else {
            LaunchMode::Packaged
        }
    }
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LaunchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(LaunchMode::Development),
            "packaged" | "release" => Ok(LaunchMode::Packaged),
            other => Err(format!(
                "unknown launch mode '{other}' (expected 'development' or 'packaged')"
            )),
        }
    }
}

/// One of the two supervised servers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ServerRole {
    /// Backend API server
    Api,
    /// Web frontend server
    Web,
}

impl ServerRole {
    /// Both roles in launch order
    pub const ALL: [ServerRole; 2] = [ServerRole::Api, ServerRole::Web];

    /// Short identifier used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            ServerRole::Api => "api",
            ServerRole::Web => "web",
        }
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of the server orchestrator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum OrchestratorState {
    /// Nothing has happened yet
    Idle,
    /// Two distinct ports have been allocated
    PortsAllocated,
    /// Server processes are being launched
    Starting,
    /// Both server processes have been spawned
    Running,
    /// Server processes are being terminated
    Stopping,
    /// Terminal state; the orchestrator cannot be restarted
    Stopped,
}

impl OrchestratorState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrchestratorState::Stopped)
    }

    /// Whether a start may still be issued from this state
    pub fn can_start(&self) -> bool {
        matches!(self, OrchestratorState::Idle | OrchestratorState::PortsAllocated)
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::PortsAllocated => "ports-allocated",
            OrchestratorState::Starting => "starting",
            OrchestratorState::Running => "running",
            OrchestratorState::Stopping => "stopping",
            OrchestratorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// A command line for one launch mode
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    /// Program to execute
    pub command: String,

    /// Arguments; every `{port}` is replaced with the allocated port
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create a command spec from a program and its arguments
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Arguments with the port placeholder substituted
    pub fn render_args(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
            .collect()
    }
}

/// Fully resolved launch configuration for one server
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Source directory relative to the base directory (development)
    pub dev_directory: String,

    /// Build directory relative to the resources directory (packaged)
    pub packaged_directory: String,

    /// Development runtime invocation
    pub dev: CommandSpec,

    /// Packaged executable invocation; relative commands resolve against the build directory
    pub packaged: CommandSpec,

    /// Preferred port; a free port is allocated when absent or busy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl ServerConfig {
    /// Built-in configuration for a role
    pub fn defaults_for(role: ServerRole) -> Self {
        match role {
            ServerRole::Api => Self {
                dev_directory: "servers/fastapi".to_string(),
                packaged_directory: "fastapi".to_string(),
                dev: CommandSpec::new("python3", ["server.py", "--port", PORT_PLACEHOLDER]),
                packaged: CommandSpec::new("fastapi", ["--port", PORT_PLACEHOLDER]),
                port: None,
            },
            ServerRole::Web => Self {
                dev_directory: "servers/nextjs".to_string(),
                packaged_directory: "nextjs".to_string(),
                dev: CommandSpec::new("npm", ["run", "dev", "--", "-p", PORT_PLACEHOLDER]),
                packaged: CommandSpec::new("nextjs-server", ["--port", PORT_PLACEHOLDER]),
                port: None,
            },
        }
    }

    /// Command line used in the given mode
    pub fn command_for(&self, mode: LaunchMode) -> &CommandSpec {
        match mode {
            LaunchMode::Development => &self.dev,
            LaunchMode::Packaged => &self.packaged,
        }
    }

    /// Relative directory used in the given mode
    pub fn directory_for(&self, mode: LaunchMode) -> &str {
        match mode {
            LaunchMode::Development => &self.dev_directory,
            LaunchMode::Packaged => &self.packaged_directory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_mode_parsing() {
        assert_eq!("dev".parse::<LaunchMode>(), Ok(LaunchMode::Development));
        assert_eq!("Packaged".parse::<LaunchMode>(), Ok(LaunchMode::Packaged));
        assert!("staging".parse::<LaunchMode>().is_err());
    }

    #[test]
    fn test_debug_flag() {
        assert_eq!(LaunchMode::Development.debug_flag(), "True");
        assert_eq!(LaunchMode::Packaged.debug_flag(), "False");
    }

    #[test]
    fn test_render_args_substitutes_port() {
        let cmd = CommandSpec::new("npm", ["run", "dev", "--", "-p", "{port}"]);
        assert_eq!(cmd.render_args(51343), vec!["run", "dev", "--", "-p", "51343"]);

        let cmd = CommandSpec::new("server", ["--bind=127.0.0.1:{port}"]);
        assert_eq!(cmd.render_args(8000), vec!["--bind=127.0.0.1:8000"]);
    }

    #[test]
    fn test_defaults_per_mode() {
        let api = ServerConfig::defaults_for(ServerRole::Api);
        assert_eq!(api.directory_for(LaunchMode::Development), "servers/fastapi");
        assert_eq!(api.directory_for(LaunchMode::Packaged), "fastapi");
        assert_eq!(api.command_for(LaunchMode::Development).command, "python3");

        let web = ServerConfig::defaults_for(ServerRole::Web);
        assert_eq!(web.command_for(LaunchMode::Development).command, "npm");
        assert_eq!(web.command_for(LaunchMode::Packaged).command, "nextjs-server");
    }

    #[test]
    fn test_state_predicates() {
        assert!(OrchestratorState::Idle.can_start());
        assert!(OrchestratorState::PortsAllocated.can_start());
        assert!(!OrchestratorState::Running.can_start());
        assert!(!OrchestratorState::Stopped.can_start());
        assert!(OrchestratorState::Stopped.is_terminal());
    }
}
