use thiserror::Error;

/// Custom error types for the admission service
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// Configuration could not be loaded or deserialized
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration was loaded but failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Logging subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// Internal service errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for admission service operations
pub type AdmissionResult<T> = Result<T, AdmissionError>;

impl AdmissionError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        AdmissionError::InvalidConfig(msg.into())
    }
}

impl From<std::io::Error> for AdmissionError {
    fn from(err: std::io::Error) -> Self {
        AdmissionError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AdmissionError {
    fn from(err: tokio::task::JoinError) -> Self {
        AdmissionError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_message() {
        let err = AdmissionError::invalid("burst_size must be greater than 0");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: burst_size must be greater than 0"
        );
    }

    #[test]
    fn test_io_error_maps_to_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: AdmissionError = io.into();
        assert!(matches!(err, AdmissionError::Internal(msg) if msg == "boom"));
    }
}
