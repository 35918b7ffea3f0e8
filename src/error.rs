//! Error types for the query engine.

/// Error type for engine operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid input or parameter errors.
    InvalidInput(String),

    /// Upstream request or transport errors.
    Upstream(String),

    /// Internal errors indicating bugs or invariant violations.
    Internal(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
