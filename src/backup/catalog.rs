//! Backup catalog
//!
//! Durable list of committed [`BackupRecord`]s, persisted as a JSON array.
//! Every mutation rewrites the file atomically, so a crash leaves either the
//! old catalog or the new one.

use std::path::{Path, PathBuf};

use crate::error::{KeepsakeError, KeepsakeResult};
use crate::models::{BackupId, BackupRecord};
use crate::storage::{read_json, write_json_atomic};

/// Catalog stored at `backups/catalog.json`
#[derive(Debug, Clone)]
pub struct Catalog {
    path: PathBuf,
}

impl Catalog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records in commit order
    pub fn list(&self) -> KeepsakeResult<Vec<BackupRecord>> {
        read_json(&self.path)
    }

    pub fn get(&self, id: &BackupId) -> KeepsakeResult<Option<BackupRecord>> {
        Ok(self.list()?.into_iter().find(|r| &r.id == id))
    }

    /// Records whose id starts with `fragment` (`bkp-1a2b`, a full UUID...)
    pub fn find(&self, fragment: &str) -> KeepsakeResult<Vec<BackupRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.id.matches_prefix(fragment))
            .collect())
    }

    /// Add a committed record
    pub fn append(&self, record: &BackupRecord) -> KeepsakeResult<()> {
        let mut records = self.list()?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(KeepsakeError::Duplicate {
                entity_type: "Backup",
                identifier: record.id.to_string(),
            });
        }
        records.push(record.clone());
        write_json_atomic(&self.path, &records)
    }

    /// Drop a record, returning it if it was present
    pub fn remove(&self, id: &BackupId) -> KeepsakeResult<Option<BackupRecord>> {
        let mut records = self.list()?;
        let Some(index) = records.iter().position(|r| &r.id == id) else {
            return Ok(None);
        };
        let removed = records.remove(index);
        write_json_atomic(&self.path, &records)?;
        Ok(Some(removed))
    }
}
