//! Environment handed to each server
//!
//! Both maps are built fresh for every launch. The web frontend's map can
//! only be built from a [`PortPair`], so it always carries the API port of
//! the same run.

use crate::port::PortPair;
use crate::process::EnvironmentMap;
use schema::LaunchMode;
use std::path::PathBuf;

/// Origin the servers are reached at
pub const LOCALHOST: &str = "http://localhost";

/// Provider settings forwarded from the host's environment to the API server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    /// `LLM`: which language-model provider the API uses
    pub llm: Option<String>,
    /// `OPENAI_API_KEY`
    pub openai_api_key: Option<String>,
    /// `GOOGLE_API_KEY`
    pub google_api_key: Option<String>,
    /// `LIBREOFFICE`: office document conversion toggle
    pub libreoffice: Option<String>,
}

impl Secrets {
    /// Read the provider settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the provider settings through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            llm: lookup("LLM"),
            openai_api_key: lookup("OPENAI_API_KEY"),
            google_api_key: lookup("GOOGLE_API_KEY"),
            libreoffice: lookup("LIBREOFFICE"),
        }
    }

    fn entries(&self) -> [(&'static str, Option<&String>); 4] {
        [
            ("LLM", self.llm.as_ref()),
            ("OPENAI_API_KEY", self.openai_api_key.as_ref()),
            ("GOOGLE_API_KEY", self.google_api_key.as_ref()),
            ("LIBREOFFICE", self.libreoffice.as_ref()),
        ]
    }
}

/// Host-provided facts shared by both servers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerContext {
    /// Development or packaged run
    pub mode: LaunchMode,
    /// Per-user application data directory
    pub app_data_dir: PathBuf,
    /// Scratch directory
    pub temp_dir: PathBuf,
    /// Location of the user configuration file
    pub user_config_path: PathBuf,
    /// Provider settings for the API server
    pub secrets: Secrets,
}

/// `http://localhost:<port>`
pub fn localhost_url(port: u16) -> String {
    format!("{LOCALHOST}:{port}")
}

fn path_value(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Environment of the API server listening on `port`
///
/// Secrets that are not set in the host are left out entirely.
pub fn api_environment(ctx: &ServerContext, port: u16) -> EnvironmentMap {
    let mut env = EnvironmentMap::new();
    env.insert("PORT".to_string(), port.to_string());
    env.insert("DEBUG".to_string(), ctx.mode.debug_flag().to_string());
    for (key, value) in ctx.secrets.entries() {
        if let Some(value) = value {
            env.insert(key.to_string(), value.clone());
        }
    }
    env.insert(
        "APP_DATA_DIRECTORY".to_string(),
        path_value(&ctx.app_data_dir),
    );
    env.insert("TEMP_DIRECTORY".to_string(), path_value(&ctx.temp_dir));
    env.insert(
        "USER_CONFIG_PATH".to_string(),
        path_value(&ctx.user_config_path),
    );
    env
}

/// Environment of the web frontend, wired to the API of the same run
pub fn web_environment(ctx: &ServerContext, ports: PortPair) -> EnvironmentMap {
    let mut env = EnvironmentMap::new();
    env.insert("PORT".to_string(), ports.web().to_string());
    env.insert(
        "NEXT_PUBLIC_FAST_API".to_string(),
        localhost_url(ports.api()),
    );
    env.insert("TEMP_DIRECTORY".to_string(), path_value(&ctx.temp_dir));
    env.insert("NEXT_PUBLIC_URL".to_string(), localhost_url(ports.web()));
    env.insert(
        "USER_CONFIG_PATH".to_string(),
        path_value(&ctx.user_config_path),
    );
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn context(mode: LaunchMode, secrets: Secrets) -> ServerContext {
        ServerContext {
            mode,
            app_data_dir: PathBuf::from("/home/me/.tandem"),
            temp_dir: PathBuf::from("/tmp"),
            user_config_path: PathBuf::from("/home/me/.tandem/userConfig.json"),
            secrets,
        }
    }

    #[test]
    fn test_api_environment_development() {
        let secrets = Secrets {
            llm: Some("openai".to_string()),
            openai_api_key: Some("sk-test".to_string()),
            ..Secrets::default()
        };
        let env = api_environment(&context(LaunchMode::Development, secrets), 51342);

        assert_eq!(env["PORT"], "51342");
        assert_eq!(env["DEBUG"], "True");
        assert_eq!(env["LLM"], "openai");
        assert_eq!(env["OPENAI_API_KEY"], "sk-test");
        assert_eq!(env["APP_DATA_DIRECTORY"], "/home/me/.tandem");
        assert_eq!(env["TEMP_DIRECTORY"], "/tmp");
        assert_eq!(env["USER_CONFIG_PATH"], "/home/me/.tandem/userConfig.json");
        // Unset secrets are omitted, not exported empty
        assert!(!env.contains_key("GOOGLE_API_KEY"));
        assert!(!env.contains_key("LIBREOFFICE"));
    }

    #[test]
    fn test_api_environment_packaged_debug_flag() {
        let env = api_environment(&context(LaunchMode::Packaged, Secrets::default()), 8000);
        assert_eq!(env["DEBUG"], "False");
        assert_eq!(env.len(), 5);
    }

    #[test]
    fn test_web_environment_carries_api_port() {
        let ports = PortPair::new(51342, 51343).expect("distinct ports");
        let env = web_environment(&context(LaunchMode::Packaged, Secrets::default()), ports);

        assert_eq!(env["PORT"], "51343");
        assert_eq!(env["NEXT_PUBLIC_FAST_API"], "http://localhost:51342");
        assert_eq!(env["NEXT_PUBLIC_URL"], "http://localhost:51343");
        assert_eq!(env["TEMP_DIRECTORY"], "/tmp");
        assert_eq!(env["USER_CONFIG_PATH"], "/home/me/.tandem/userConfig.json");
        assert_eq!(env.len(), 5);
        // The frontend never sees provider secrets
        assert!(!env.contains_key("DEBUG"));
    }

    #[test]
    fn test_secrets_from_lookup() {
        let vars = HashMap::from([("GOOGLE_API_KEY", "g-key"), ("LIBREOFFICE", "")]);
        let secrets = Secrets::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(secrets.llm, None);
        assert_eq!(secrets.google_api_key.as_deref(), Some("g-key"));
        // Set-but-empty is still forwarded
        assert_eq!(secrets.libreoffice.as_deref(), Some(""));
    }
}
