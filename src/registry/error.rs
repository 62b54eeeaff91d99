//! Registry error types
//!
//! Refusals from the directory and the stream lifecycle.

use super::path::StreamPath;

/// Error type for directory operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Stream path is not `app/name` with valid segments
    InvalidPath(String),
    /// Stream already has a publisher and the newcomer may not kick it
    PublisherExists(StreamPath),
    /// Stream is closing and accepts no new members
    StreamClosed(StreamPath),
    /// No stream under this path
    NotFound(StreamPath),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::InvalidPath(path) => write!(f, "invalid stream path: {:?}", path),
            RegistryError::PublisherExists(path) => {
                write!(f, "stream already has a publisher: {}", path)
            }
            RegistryError::StreamClosed(path) => write!(f, "stream closed: {}", path),
            RegistryError::NotFound(path) => write!(f, "stream not found: {}", path),
        }
    }
}

impl std::error::Error for RegistryError {}
