//! Imation error types

use std::path::PathBuf;
use thiserror::Error;

/// Imation error type
#[derive(Error, Debug)]
pub enum Error {
    /// Prompt is empty, whitespace-only, or too long
    #[error("Invalid prompt: {0}")]
    InvalidPrompt(String),

    /// Identifier failed syntax validation (never touches the filesystem)
    #[error("Invalid artifact id: {0}")]
    InvalidId(String),

    /// Identifier is well-formed but no such artifact is retained
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// The image generator is not loaded or reported itself unavailable
    #[error("Image generator unavailable: {0}")]
    GeneratorUnavailable(String),

    /// The image generator call failed
    #[error("Image generation failed: {0}")]
    GenerationFailed(String),

    /// Filesystem operation failed
    #[error("Storage error during {op} on {}: {source}", path.display())]
    Storage {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap an IO error with the operation and path it happened on.
    pub fn storage(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            op,
            path: path.into(),
            source,
        }
    }

    /// Machine-readable error kind, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPrompt(_) => "INVALID_PROMPT",
            Self::InvalidId(_) => "INVALID_ID",
            Self::NotFound(_) => "NOT_FOUND",
            Self::GeneratorUnavailable(_) => "GENERATOR_UNAVAILABLE",
            Self::GenerationFailed(_) => "GENERATION_FAILED",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Underlying IO error kind for storage failures.
    ///
    /// Lets callers tell a missing file from a permission problem or a full disk.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::Storage { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

/// Result type alias for Imation operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Error::InvalidPrompt("x".into()).kind(), "INVALID_PROMPT");
        assert_eq!(Error::InvalidId("x".into()).kind(), "INVALID_ID");
        assert_eq!(Error::NotFound("x".into()).kind(), "NOT_FOUND");
        assert_eq!(
            Error::GeneratorUnavailable("x".into()).kind(),
            "GENERATOR_UNAVAILABLE"
        );
        assert_eq!(Error::GenerationFailed("x".into()).kind(), "GENERATION_FAILED");
    }

    #[test]
    fn test_storage_error_keeps_cause() {
        let err = Error::storage(
            "write",
            "/tmp/images/x.jpg",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert_eq!(err.kind(), "STORAGE_ERROR");
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::PermissionDenied));
        assert!(err.to_string().contains("/tmp/images/x.jpg"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_non_storage_has_no_io_kind() {
        assert!(Error::NotFound("a".into()).io_kind().is_none());
    }
}
