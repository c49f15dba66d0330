//! Backup catalog entries

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::BackupId;
use crate::remote::RemoteId;

/// Metadata about one completed backup
///
/// Records are immutable once committed to the catalog. Sizes and counts
/// describe the source data before compression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Unique identifier assigned when the pipeline started
    pub id: BackupId,

    /// When the pipeline started
    pub created_at: DateTime<Utc>,

    /// Number of source files included
    pub file_count: u64,

    /// Sum of source file sizes before compression
    pub total_size_bytes: u64,

    /// Reference to the uploaded blob, absent for local-only backups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<RemoteId>,

    /// Always true for records produced by this pipeline
    pub is_encrypted: bool,

    /// On-device copy of the encrypted archive, if retained
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_archive_path: Option<PathBuf>,

    /// Whether media files were collected
    #[serde(default)]
    pub includes_media: bool,

    /// Size of the encrypted archive blob
    #[serde(default)]
    pub archive_size_bytes: u64,
}

impl BackupRecord {
    /// Whether the record points at an uploaded blob
    pub fn is_remote(&self) -> bool {
        self.remote_id.is_some()
    }

    /// The retained local archive, if it still exists on disk
    pub fn local_archive(&self) -> Option<&Path> {
        self.local_archive_path
            .as_deref()
            .filter(|path| path.exists())
    }

    /// Short location summary for listings
    pub fn location_label(&self) -> &'static str {
        match (self.local_archive_path.is_some(), self.remote_id.is_some()) {
            (true, true) => "local+remote",
            (true, false) => "local",
            (false, true) => "remote",
            (false, false) => "none",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> BackupRecord {
        BackupRecord {
            id: BackupId::new(),
            created_at: Utc::now(),
            file_count: 12,
            total_size_bytes: 503 * 1024,
            remote_id: None,
            is_encrypted: true,
            local_archive_path: Some(PathBuf::from("/nonexistent/a.kpk")),
            includes_media: true,
            archive_size_bytes: 4096,
        }
    }

    #[test]
    fn test_serde_round_trip() {
        let record = record();
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("remote_id"));
        let back: BackupRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn test_location_label() {
        let mut record = record();
        assert_eq!(record.location_label(), "local");
        record.remote_id = Some(RemoteId::new("obj-1"));
        assert_eq!(record.location_label(), "local+remote");
        assert!(record.is_remote());
        record.local_archive_path = None;
        assert_eq!(record.location_label(), "remote");
    }

    #[test]
    fn test_missing_local_archive() {
        let record = record();
        assert!(record.local_archive().is_none());
    }
}
