use thiserror::Error;

/// Top-level error type for the Reveille system.
///
/// Subsystem crates define their own error enums and wrap this one with
/// `#[from]`, so `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReveilleError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl From<toml::de::Error> for ReveilleError {
    fn from(err: toml::de::Error) -> Self {
        ReveilleError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ReveilleError {
    fn from(err: toml::ser::Error) -> Self {
        ReveilleError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ReveilleError {
    fn from(err: serde_json::Error) -> Self {
        ReveilleError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Reveille operations.
pub type Result<T> = std::result::Result<T, ReveilleError>;
