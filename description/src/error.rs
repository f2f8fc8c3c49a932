//! Error types for description documents.

use thiserror::Error;

/// Errors raised while reading device and service descriptions.
#[derive(Debug, Clone, Error)]
pub enum DescriptionError {
    /// The document is malformed or misses required fields
    #[error("parse error: {0}")]
    Parse(String),

    /// A URL in the document cannot be resolved
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A service type is not of the form `urn:<domain>:service:<type>:<version>`
    #[error("invalid service type {0:?}")]
    InvalidServiceType(String),
}

/// Convenience Result type alias for description operations.
pub type Result<T> = std::result::Result<T, DescriptionError>;
