#[cfg(test)]
mod tests {
    use crate::error::*;
    use std::error::Error;
    use std::io;
    use std::time::Duration;

    #[test]
    fn test_core_error_display() {
        let err = CoreError::NoAvailablePort { tried: 64 };
        assert_eq!(err.to_string(), "No available port after 64 attempts");

        let err = CoreError::ProcessSpawn("Failed to spawn 'python3': not found".to_string());
        assert_eq!(
            err.to_string(),
            "Failed to spawn process: Failed to spawn 'python3': not found"
        );

        let err = CoreError::InvalidState {
            state: "Stopped".to_string(),
            operation: "start".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Operation not allowed in state Stopped: start"
        );

        let err = CoreError::ReadinessTimeout {
            role: "api".to_string(),
            timeout: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "Server 'api' did not become ready within 2s");
    }

    #[test]
    fn test_core_error_from_std_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let core_err: CoreError = io_err.into();

        if let CoreError::IoError(_) = core_err {
            // Expected variant
        } else {
            panic!("Expected CoreError::IoError variant");
        }
    }

    #[test]
    fn test_core_error_from_serde_error() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let core_err: CoreError = serde_err.into();
        assert!(matches!(core_err, CoreError::SerializationError(_)));
        assert!(core_err.source().is_some());
    }

    #[test]
    fn test_from_implementations() {
        let error: CoreError = "test error".into();
        assert_eq!(error.to_string(), "Generic error: test error");

        let error: CoreError = "test error".to_string().into();
        assert_eq!(error.to_string(), "Generic error: test error");
    }

    #[test]
    fn test_startup_fatality() {
        assert!(CoreError::NoAvailablePort { tried: 1 }.is_fatal_to_startup());
        assert!(CoreError::ProcessSpawn("x".to_string()).is_fatal_to_startup());
        assert!(!CoreError::ProcessSignal("x".to_string()).is_fatal_to_startup());
        assert!(!CoreError::ReadinessTimeout {
            role: "web".to_string(),
            timeout: Duration::from_secs(1),
        }
        .is_fatal_to_startup());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CoreError::ConfigurationError("test".to_string()).code(),
            "CORE001"
        );
        assert_eq!(
            CoreError::ValidationError("test".to_string()).code(),
            "CORE002"
        );
        assert_eq!(CoreError::NoAvailablePort { tried: 3 }.code(), "CORE010");
        assert_eq!(CoreError::PortInUse(80).code(), "CORE011");
        assert_eq!(CoreError::ProcessSpawn("test".to_string()).code(), "CORE020");
        assert_eq!(CoreError::ProcessSignal("test".to_string()).code(), "CORE021");
        assert_eq!(CoreError::Other("test".to_string()).code(), "CORE999");
    }
}
