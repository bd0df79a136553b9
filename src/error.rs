//! Error types for Strata.

use thiserror::Error;

/// Result type alias using Strata's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Strata operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A transport or collaborator required by the configured topology is
    /// missing or was handed invalid parameters.
    #[error("configuration error: {0}")]
    Config(String),

    /// The requested delivery mode is not defined for the configured
    /// topology.
    #[error("unsupported delivery: {0}")]
    Unsupported(String),

    /// Marshalling or unmarshalling a dataset failed.
    #[error("marshal error: {0}")]
    Marshal(String),

    /// A transport exchange failed or produced inconsistent framing.
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
