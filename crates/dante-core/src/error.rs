use thiserror::Error;

/// Top-level error type shared by the Dante crates.
///
/// Subsystem crates keep their own error enums and convert into
/// `DanteError` where they cross a crate boundary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DanteError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Integration error: {0}")]
    Integration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for DanteError {
    fn from(err: toml::de::Error) -> Self {
        DanteError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DanteError {
    fn from(err: toml::ser::Error) -> Self {
        DanteError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for DanteError {
    fn from(err: serde_json::Error) -> Self {
        DanteError::Serialization(err.to_string())
    }
}

impl From<crate::validation::ValidationError> for DanteError {
    fn from(err: crate::validation::ValidationError) -> Self {
        DanteError::Validation(err.to_string())
    }
}

/// A specialized `Result` type for Dante operations.
pub type Result<T> = std::result::Result<T, DanteError>;
