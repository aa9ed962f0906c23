use thiserror::Error;

/// runtally error types
#[derive(Error, Debug)]
pub enum RuntallyError {
    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Platform API call failed
    #[error("api error: {0}")]
    Api(String),

    /// Checkpoint load/save failed
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Record output failed
    #[error("output error: {0}")]
    Output(String),

    /// File I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for runtally
pub type Result<T> = std::result::Result<T, RuntallyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntallyError::Api("status 500".into());
        assert_eq!(err.to_string(), "api error: status 500");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RuntallyError = io_err.into();
        assert!(err.to_string().contains("io error"));
    }
}
