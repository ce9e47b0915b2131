use thiserror::Error;

/// Result type for infrastructure operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading configuration or installing logging
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be read, parsed or validated
    #[error("Configuration error: {0}")]
    Config(String),

    /// The logging subscriber could not be installed
    #[error("Logging error: {0}")]
    Logging(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}
