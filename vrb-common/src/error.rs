//! Common error types for VRB

use thiserror::Error;

/// Common result type for VRB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across VRB crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested file or directory not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Tag encoding or decoding failure
    #[error("Tag error: {0}")]
    Tag(String),
}
