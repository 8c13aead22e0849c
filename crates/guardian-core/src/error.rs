use thiserror::Error;

/// Top-level error type for the Guardian system.
///
/// Subsystem crates define their own error types and convert into
/// `GuardianError` where they cross crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GuardianError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl From<toml::de::Error> for GuardianError {
    fn from(err: toml::de::Error) -> Self {
        GuardianError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for GuardianError {
    fn from(err: toml::ser::Error) -> Self {
        GuardianError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for GuardianError {
    fn from(err: serde_json::Error) -> Self {
        GuardianError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Guardian operations.
pub type Result<T> = std::result::Result<T, GuardianError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GuardianError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");

        let err = GuardianError::NotFound("action abc".to_string());
        assert_eq!(err.to_string(), "Record not found: action abc");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GuardianError = io_err.into();
        assert!(matches!(err, GuardianError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_toml_error_conversion() {
        let parse_err = toml::from_str::<toml::Value>("not = [valid").unwrap_err();
        let err: GuardianError = parse_err.into();
        assert!(matches!(err, GuardianError::Config(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: GuardianError = json_err.into();
        assert!(matches!(err, GuardianError::Serialization(_)));
    }
}
