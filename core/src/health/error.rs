//! Error types for readiness probing

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while probing a server
#[derive(Error, Debug)]
pub enum HealthError {
    /// The probe, or the overall wait, timed out
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// TCP connection failed
    #[error("tcp connection failed: {0}")]
    Tcp(#[from] std::io::Error),
}

impl HealthError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            HealthError::Timeout(_) => "HEALTH001",
            HealthError::Tcp(_) => "HEALTH002",
        }
    }
}
