//! Pipeline error taxonomy
//!
//! Every create/restore/delete failure surfaces as one [`BackupError`] whose
//! [`ErrorKind`] is enough for a caller to pick an actionable message
//! ("no network" versus "corrupted backup") without knowing stage details.

use std::fmt;

use thiserror::Error;

use crate::error::KeepsakeError;
use crate::models::BackupRecord;
use crate::remote::RemoteError;

/// Coarse classification of a pipeline failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Preparation,
    Collection,
    Compression,
    Encryption,
    Integrity,
    Network,
    NotFound,
    Concurrency,
    Validation,
    Cancelled,
    Catalog,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Preparation => "preparation",
            ErrorKind::Collection => "collection",
            ErrorKind::Compression => "compression",
            ErrorKind::Encryption => "encryption",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Network => "network",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Concurrency => "concurrency",
            ErrorKind::Validation => "validation",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Catalog => "catalog",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}

/// Failure of a backup, restore or delete operation
#[derive(Error, Debug)]
pub enum BackupError {
    /// Staging area unavailable
    #[error("Could not prepare staging area: {0}")]
    Preparation(String),

    /// Source data unreadable
    #[error("Could not read source data: {0}")]
    Collection(String),

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Authentication failure on decrypt, never retried
    #[error("Backup is corrupted or was tampered with: {0}")]
    Integrity(String),

    /// Upload/download failure, retryable by the caller.
    ///
    /// When an upload fails after the local archive was sealed, the
    /// local-only record that was committed instead travels here.
    #[error("Network error: {message}")]
    Network {
        message: String,
        local_record: Option<Box<BackupRecord>>,
    },

    /// Unknown record id or remote blob
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Another operation holds the guard
    #[error("Another backup or restore operation is already in progress")]
    Concurrency,

    /// Restored content failed structural checks
    #[error("Restored content failed validation: {0}")]
    Validation(String),

    #[error("Operation cancelled")]
    Cancelled,

    /// Catalog could not be read or written
    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Restore failures share the pipeline taxonomy
pub type RestoreError = BackupError;

impl BackupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::Preparation(_) => ErrorKind::Preparation,
            BackupError::Collection(_) => ErrorKind::Collection,
            BackupError::Compression(_) => ErrorKind::Compression,
            BackupError::Encryption(_) => ErrorKind::Encryption,
            BackupError::Integrity(_) => ErrorKind::Integrity,
            BackupError::Network { .. } => ErrorKind::Network,
            BackupError::NotFound { .. } => ErrorKind::NotFound,
            BackupError::Concurrency => ErrorKind::Concurrency,
            BackupError::Validation(_) => ErrorKind::Validation,
            BackupError::Cancelled => ErrorKind::Cancelled,
            BackupError::Catalog(_) => ErrorKind::Catalog,
            BackupError::Config(_) => ErrorKind::Config,
        }
    }

    /// Create a "not found" error for backup records
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            local_record: None,
        }
    }

    /// Whether retrying the same call later might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Concurrency)
    }

    /// Local-only record committed when only the upload failed
    pub fn local_record(&self) -> Option<&BackupRecord> {
        match self {
            Self::Network { local_record, .. } => local_record.as_deref(),
            _ => None,
        }
    }

    /// Map a cipher failure raised while sealing an archive
    pub(crate) fn from_sealing(err: KeepsakeError) -> Self {
        match err {
            KeepsakeError::Cancelled => Self::Cancelled,
            other => Self::Encryption(other.to_string()),
        }
    }

    /// Map a cipher failure raised while opening an archive
    pub(crate) fn from_opening(err: KeepsakeError) -> Self {
        match err {
            KeepsakeError::Cancelled => Self::Cancelled,
            KeepsakeError::Integrity(msg) => Self::Integrity(msg),
            other => Self::Encryption(other.to_string()),
        }
    }

    /// Map a failure loading keys or settings
    pub(crate) fn from_setup(err: KeepsakeError) -> Self {
        match err {
            KeepsakeError::Encryption(msg) => Self::Encryption(msg),
            other => Self::Config(other.to_string()),
        }
    }

    /// Map a catalog persistence failure
    pub(crate) fn from_catalog(err: KeepsakeError) -> Self {
        Self::Catalog(err.to_string())
    }
}

impl From<RemoteError> for BackupError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Network(message) => Self::network(message),
            RemoteError::NotFound(id) => Self::NotFound {
                entity_type: "Remote blob",
                identifier: id,
            },
            RemoteError::Aborted => Self::Cancelled,
        }
    }
}
