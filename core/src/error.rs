//! Core error types and utilities

use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),

    /// No free port could be found; fatal to startup
    #[error("No available port after {tried} attempts")]
    NoAvailablePort { tried: usize },

    #[error("Port {0} is already in use")]
    PortInUse(u16),

    /// The executable could not be launched; fatal to startup
    #[error("Failed to spawn process: {0}")]
    ProcessSpawn(String),

    /// The OS refused to signal a live process; reported, never fatal
    #[error("Failed to signal process: {0}")]
    ProcessSignal(String),

    #[error("Failed to wait for process: {0}")]
    ProcessWait(String),

    #[error("Operation not allowed in state {state}: {operation}")]
    InvalidState { state: String, operation: String },

    #[error("Server '{role}' did not become ready within {timeout:?}")]
    ReadinessTimeout {
        role: String,
        timeout: std::time::Duration,
    },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Other(String),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ConfigurationError(_) => "CORE001",
            CoreError::ValidationError(_) => "CORE002",
            CoreError::InitializationError(_) => "CORE003",
            CoreError::NoAvailablePort { .. } => "CORE010",
            CoreError::PortInUse(_) => "CORE011",
            CoreError::ProcessSpawn(_) => "CORE020",
            CoreError::ProcessSignal(_) => "CORE021",
            CoreError::ProcessWait(_) => "CORE022",
            CoreError::InvalidState { .. } => "CORE030",
            CoreError::ReadinessTimeout { .. } => "CORE031",
            CoreError::IoError(_) => "CORE005",
            CoreError::SerializationError(_) => "CORE006",
            CoreError::Other(_) => "CORE999",
        }
    }

    /// Whether this error must abort startup
    pub fn is_fatal_to_startup(&self) -> bool {
        !matches!(
            self,
            CoreError::ProcessSignal(_) | CoreError::ReadinessTimeout { .. }
        )
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

// Convenience implementations
impl From<&str> for CoreError {
    fn from(s: &str) -> Self {
        CoreError::Other(s.to_string())
    }
}

impl From<String> for CoreError {
    fn from(s: String) -> Self {
        CoreError::Other(s)
    }
}
