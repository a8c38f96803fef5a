//! Error types for the digest data model.

use thiserror::Error;

/// Digest domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid instance name: {0}")]
    InvalidInstanceName(String),

    #[error("invalid resource naming scheme: {0}")]
    InvalidResourceName(String),

    #[error("invalid blob size: {0}")]
    InvalidSize(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
}

/// Result type alias for digest operations.
pub type Result<T> = std::result::Result<T, Error>;
