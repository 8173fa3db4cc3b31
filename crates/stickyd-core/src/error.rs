//! Error types shared across stickyd crates

use thiserror::Error;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by core services
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration could not be validated
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Logging subscriber could not be installed
    #[error("logging setup failed: {0}")]
    Logging(String),
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field holds a value outside its accepted range
    #[error("invalid config value: {0}")]
    InvalidValue(&'static str),

    /// Two fields contradict each other
    #[error("inconsistent config: {0}")]
    Inconsistent(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = ConfigError::InvalidValue("parallelism must be > 0");
        assert_eq!(e.to_string(), "invalid config value: parallelism must be > 0");

        let core: CoreError = e.into();
        assert!(core.to_string().starts_with("configuration error"));
    }
}
