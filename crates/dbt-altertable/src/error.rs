//! Adapter error types.

use thiserror::Error;

/// Errors that can occur while configuring or talking to Altertable.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Invalid or missing configuration value.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// profiles.yml could not be located or resolved.
    #[error("Profile error: {0}")]
    Profile(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(String),

    /// Opening a connection failed after all retries.
    #[error("Failed to connect: {0}")]
    FailedToConnect(String),

    /// Authentication handshake failed.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Database returned an error.
    #[error("Database error: {0}")]
    Database(String),

    /// SQL execution failed on a dbt connection.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Transaction misuse (double begin, commit without begin).
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Arrow decoding error.
    #[error("Arrow error: {0}")]
    Arrow(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// YAML parse error.
    #[error("YAML error: {0}")]
    Yaml(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for AdapterError {
    fn from(e: std::io::Error) -> Self {
        AdapterError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(e: serde_json::Error) -> Self {
        AdapterError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for AdapterError {
    fn from(e: serde_yaml::Error) -> Self {
        AdapterError::Yaml(e.to_string())
    }
}

impl From<minijinja::Error> for AdapterError {
    fn from(e: minijinja::Error) -> Self {
        AdapterError::Template(e.to_string())
    }
}

impl From<arrow_schema::ArrowError> for AdapterError {
    fn from(e: arrow_schema::ArrowError) -> Self {
        AdapterError::Arrow(e.to_string())
    }
}

impl From<tonic::transport::Error> for AdapterError {
    fn from(e: tonic::transport::Error) -> Self {
        AdapterError::FailedToConnect(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AdapterError::Configuration("port out of range".to_string());
        assert_eq!(err.to_string(), "Configuration error: port out of range");

        let err = AdapterError::Runtime("table not found".to_string());
        assert_eq!(err.to_string(), "Runtime error: table not found");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "profiles.yml");
        let err: AdapterError = io_err.into();
        assert!(matches!(err, AdapterError::Io(_)));
    }

    #[test]
    fn test_error_from_yaml() {
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>("a: [").unwrap_err();
        let err: AdapterError = yaml_err.into();
        assert!(matches!(err, AdapterError::Yaml(_)));
    }
}
