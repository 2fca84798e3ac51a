//! Host error types

use tandem_core::CoreError;
use thiserror::Error;

/// Host-specific error types
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Startup failed: {0}")]
    StartupFailed(#[source] CoreError),

    #[error("Servers not ready: {0}")]
    NotReady(#[source] CoreError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl HostError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            HostError::InvalidArgument(_) => "HOST001",
            HostError::ConfigError(_) => "HOST002",
            HostError::StartupFailed(_) => "HOST003",
            HostError::NotReady(_) => "HOST004",
            HostError::Core(_) => "HOST005",
            HostError::IoError(_) => "HOST008",
        }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            HostError::InvalidArgument(_) | HostError::ConfigError(_) => 2,
            HostError::StartupFailed(_) => 3,
            HostError::NotReady(_) => 4,
            HostError::Core(_) | HostError::IoError(_) => 1,
        }
    }
}

/// Host-specific result type
pub type Result<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(HostError::InvalidArgument("x".to_string()).code(), "HOST001");
        assert_eq!(HostError::ConfigError("x".to_string()).code(), "HOST002");
        assert_eq!(
            HostError::StartupFailed(CoreError::ProcessSpawn("x".to_string())).code(),
            "HOST003"
        );
        assert_eq!(
            HostError::Core(CoreError::Other("x".to_string())).code(),
            "HOST005"
        );
    }

    #[test]
    fn test_exit_codes_are_nonzero() {
        let errors = [
            HostError::InvalidArgument("x".to_string()),
            HostError::StartupFailed(CoreError::NoAvailablePort { tried: 3 }),
            HostError::NotReady(CoreError::Other("x".to_string())),
            HostError::IoError(std::io::Error::other("x")),
        ];
        for err in errors {
            assert_ne!(err.exit_code(), 0, "{err}");
        }
    }

    #[test]
    fn test_error_display() {
        let error = HostError::StartupFailed(CoreError::ProcessSpawn("uvicorn".to_string()));
        assert_eq!(
            error.to_string(),
            "Startup failed: Failed to spawn process: uvicorn"
        );
    }
}
