//! Core functionality for the Tandem supervisor
//!
//! This crate allocates ports, launches the API and web frontend servers,
//! and tears their process trees down again. The host binary drives it
//! through the [`Orchestrator`].

pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod port;
pub mod process;
pub mod supervisor;

#[cfg(test)]
mod error_tests;

// Re-export schema types for convenience
pub use schema::*;

pub use config::{Layout, OrchestratorConfig, ServerLaunch};
pub use error::{CoreError, Result};
pub use port::{PortAllocator, PortGuard, PortPair, PortSource};
pub use supervisor::{Orchestrator, Secrets, ServerPids, StartedServers};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    ///
    /// `RUST_LOG` wins over `level` when it is set.
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .map_err(|e| {
                crate::CoreError::ConfigurationError(format!("Invalid log level '{level}': {e}"))
            })?;

        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| crate::CoreError::InitializationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_fails() {
        // The first call may lose to another test's subscriber; either way a
        // second global subscriber is refused
        let _ = utils::init_tracing("debug");
        assert!(matches!(
            utils::init_tracing("debug"),
            Err(CoreError::InitializationError(_))
        ));
    }
}
