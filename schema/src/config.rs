//! On-disk configuration format for the Tandem host
//!
//! Every section is optional; omitted values fall back to the built-in
//! defaults for each server role.
//!
//! ```toml
//! mode = "development"
//! dataDir = "/home/me/.tandem"
//!
//! [api]
//! port = 8000
//!
//! [web.dev]
//! command = "pnpm"
//! args = ["dev", "--port", "{port}"]
//!
//! [shutdown]
//! gracePeriodMs = 5000
//! ```

use crate::server::{CommandSpec, LaunchMode, ServerConfig, ServerRole};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TandemConfig {
    /// Launch mode; derived from the build profile when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<LaunchMode>,

    /// Base directory holding `servers/` and `resources/`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<String>,

    /// Application data directory shared by both servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Overrides for the API server
    #[serde(default)]
    pub api: ServerSection,

    /// Overrides for the web frontend server
    #[serde(default)]
    pub web: ServerSection,

    /// Termination timing
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Readiness probing
    #[serde(default)]
    pub readiness: ReadinessConfig,
}

impl TandemConfig {
    /// Section for a role
    pub fn section(&self, role: ServerRole) -> &ServerSection {
        match role {
            ServerRole::Api => &self.api,
            ServerRole::Web => &self.web,
        }
    }

    /// Resolved server configuration for a role, defaults filled in
    pub fn server(&self, role: ServerRole) -> ServerConfig {
        self.section(role).resolve(role)
    }
}

/// Partial server configuration as written in the file
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerSection {
    /// Preferred port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Source directory relative to the base directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_directory: Option<String>,

    /// Build directory relative to the resources directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packaged_directory: Option<String>,

    /// Development invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<CommandSpec>,

    /// Packaged invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packaged: Option<CommandSpec>,
}

impl ServerSection {
    /// Merge this section over the role's defaults
    pub fn resolve(&self, role: ServerRole) -> ServerConfig {
        let defaults = ServerConfig::defaults_for(role);
        ServerConfig {
            dev_directory: self.dev_directory.clone().unwrap_or(defaults.dev_directory),
            packaged_directory: self
                .packaged_directory
                .clone()
                .unwrap_or(defaults.packaged_directory),
            dev: self.dev.clone().unwrap_or(defaults.dev),
            packaged: self.packaged.clone().unwrap_or(defaults.packaged),
            port: self.port.or(defaults.port),
        }
    }
}

/// Timing used when tearing server process trees down
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ShutdownConfig {
    /// Time allowed between the graceful signal and the forceful kill
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Time allowed for a forceful kill to take effect
    #[serde(default = "default_kill_wait_ms")]
    pub kill_wait_ms: u64,
}

impl ShutdownConfig {
    /// Grace period as a Duration
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Kill wait as a Duration
    pub fn kill_wait(&self) -> Duration {
        Duration::from_millis(self.kill_wait_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            kill_wait_ms: default_kill_wait_ms(),
        }
    }
}

const fn default_grace_period_ms() -> u64 {
    3_000
}

const fn default_kill_wait_ms() -> u64 {
    2_000
}

/// Bounded wait for both servers to accept TCP connections
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReadinessConfig {
    /// Overall deadline for both servers
    #[serde(default = "default_readiness_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay between connection attempts
    #[serde(default = "default_readiness_interval_ms")]
    pub interval_ms: u64,
}

impl ReadinessConfig {
    /// Deadline as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Poll interval as a Duration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_readiness_timeout_secs(),
            interval_ms: default_readiness_interval_ms(),
        }
    }
}

const fn default_readiness_timeout_secs() -> u64 {
    60
}

const fn default_readiness_interval_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg: TandemConfig = toml::from_str("").expect("empty config parses");
        assert_eq!(cfg, TandemConfig::default());
        assert_eq!(cfg.shutdown.grace_period(), Duration::from_secs(3));
        assert_eq!(cfg.server(ServerRole::Api), ServerConfig::defaults_for(ServerRole::Api));
    }

    #[test]
    fn test_partial_section_merges_over_defaults() {
        let cfg: TandemConfig = toml::from_str(
            r#"
            mode = "packaged"

            [web]
            port = 3000

            [web.dev]
            command = "pnpm"
            args = ["dev", "--port", "{port}"]
            "#,
        )
        .expect("config parses");

        assert_eq!(cfg.mode, Some(LaunchMode::Packaged));
        let web = cfg.server(ServerRole::Web);
        assert_eq!(web.port, Some(3000));
        assert_eq!(web.dev.command, "pnpm");
        assert_eq!(web.packaged_directory, "nextjs");
        assert_eq!(cfg.server(ServerRole::Api).port, None);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<TandemConfig, _> = toml::from_str("restartPolicy = \"always\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut cfg = TandemConfig::default();
        cfg.api.port = Some(8000);
        cfg.readiness.timeout_secs = 5;
        let json = serde_json::to_string(&cfg).expect("serialize");
        assert!(json.contains("\"timeoutSecs\":5"));
        let back: TandemConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, cfg);
    }
}
