//! Audit entry data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backup::{BackupError, DeletionReport};
use crate::models::{BackupId, BackupRecord};

/// Lifecycle events recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    BackupCreated,
    BackupRestored,
    BackupDeleted,
    OperationFailed,
}

impl std::fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditEvent::BackupCreated => write!(f, "CREATED"),
            AuditEvent::BackupRestored => write!(f, "RESTORED"),
            AuditEvent::BackupDeleted => write!(f, "DELETED"),
            AuditEvent::OperationFailed => write!(f, "FAILED"),
        }
    }
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the event was recorded (UTC)
    pub timestamp: DateTime<Utc>,

    pub event: AuditEvent,

    /// Backup the event concerns, if one was resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,

    /// Operation name for failures ("create", "restore", ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    /// Record metadata or deletion outcome
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Error kind and message for failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEntry {
    fn new(event: AuditEvent, backup_id: Option<&BackupId>) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            backup_id: backup_id.map(|id| id.to_string()),
            operation: None,
            details: None,
            error: None,
        }
    }

    /// A backup was committed to the catalog
    pub fn created(record: &BackupRecord) -> Self {
        Self {
            details: serde_json::to_value(record).ok(),
            ..Self::new(AuditEvent::BackupCreated, Some(&record.id))
        }
    }

    /// Live data was replaced from a backup
    pub fn restored(record: &BackupRecord, from_remote: bool) -> Self {
        Self {
            details: Some(serde_json::json!({
                "from_remote": from_remote,
                "file_count": record.file_count,
                "total_size_bytes": record.total_size_bytes,
            })),
            ..Self::new(AuditEvent::BackupRestored, Some(&record.id))
        }
    }

    /// A record and its blobs were removed
    pub fn deleted(record: &BackupRecord, report: &DeletionReport) -> Self {
        Self {
            details: Some(serde_json::json!({
                "record": record,
                "local_error": report.local_error,
                "remote_error": report.remote_error,
            })),
            ..Self::new(AuditEvent::BackupDeleted, Some(&record.id))
        }
    }

    /// An operation aborted
    pub fn failed(operation: &str, backup_id: Option<&BackupId>, error: &BackupError) -> Self {
        Self {
            operation: Some(operation.to_string()),
            error: Some(format!("{}: {}", error.kind(), error)),
            ..Self::new(AuditEvent::OperationFailed, backup_id)
        }
    }

    /// Format the entry for human-readable output
    pub fn format_human_readable(&self) -> String {
        let mut output = format!(
            "[{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.event
        );
        if let Some(operation) = &self.operation {
            output.push_str(&format!(" {}", operation));
        }
        if let Some(id) = &self.backup_id {
            output.push_str(&format!(" {}", id));
        }
        if let Some(error) = &self.error {
            output.push_str(&format!("\n  Error: {}", error));
        }
        output
    }
}
