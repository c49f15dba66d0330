//! Custom error types for Keepsake
//!
//! This module defines the error hierarchy for the plumbing layers
//! (configuration, storage, crypto) using thiserror. Pipeline failures have
//! their own taxonomy in [`crate::backup::BackupError`].

use thiserror::Error;

/// The main error type for Keepsake plumbing operations
#[derive(Error, Debug)]
pub enum KeepsakeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Duplicate entity errors
    #[error("{entity_type} already exists: {identifier}")]
    Duplicate {
        entity_type: &'static str,
        identifier: String,
    },

    /// Encryption errors (key setup, sealing)
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Authentication failure while opening ciphertext
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// A progress callback stopped a stream
    #[error("Operation cancelled")]
    Cancelled,
}

impl KeepsakeError {
    /// Create a "not found" error for backups
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is an integrity (authentication) failure
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}

impl From<std::io::Error> for KeepsakeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for KeepsakeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for Keepsake operations
pub type KeepsakeResult<T> = Result<T, KeepsakeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KeepsakeError::Config("test error".into());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_not_found_error() {
        let err = KeepsakeError::backup_not_found("bkp-1234abcd");
        assert_eq!(err.to_string(), "Backup not found: bkp-1234abcd");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_integrity_error() {
        let err = KeepsakeError::Integrity("chunk 3 failed authentication".into());
        assert!(err.is_integrity());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KeepsakeError = io_err.into();
        assert!(matches!(err, KeepsakeError::Io(_)));
    }
}
