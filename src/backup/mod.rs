//! Backup and restore pipeline
//!
//! [`BackupService`] is the single entry point. It owns the paths,
//! settings, key provider, catalog, optional remote store, operation guard
//! and audit log, and sequences the archive, cipher and remote layers:
//!
//! - create: prepare, collect, compress, encrypt, upload (optional),
//!   commit a catalog record
//! - restore: download or read, decrypt, decompress and validate, swap the
//!   staged data into place
//! - delete: drop the catalog record, then the local and remote blobs
//!
//! Staging lives in temporary directories next to the data they produce,
//! so every failure path removes partial state when the directory drops.
//!
//! # Example
//!
//! ```rust,ignore
//! use keepsake::backup::BackupService;
//! use keepsake::config::KeepsakePaths;
//!
//! let service = BackupService::open(KeepsakePaths::new()?)?;
//! let record = service.create_backup(true, true, &mut |s: &ProgressState| {
//!     println!("{} {}%", s.stage, s.percent);
//! })?;
//! service.restore_backup(&record.id, true, &mut |_: &ProgressState| {})?;
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{AuditEntry, AuditLogger};
use crate::config::{KeepsakePaths, Settings};
use crate::crypto::{DeviceKeyProvider, KeyProvider};
use crate::models::{BackupId, BackupRecord};
use crate::progress::CancelToken;
use crate::remote::{DirectoryStore, RemoteError, RemoteStore};
use crate::storage::remove_file_if_exists;

mod catalog;
mod create;
mod error;
mod guard;
mod restore;

pub use catalog::Catalog;
pub use error::{BackupError, ErrorKind, RestoreError};
pub use guard::{OperationGuard, OperationPermit};
pub use restore::VerificationReport;

/// Zip produced or consumed inside a staging directory
const ZIP_NAME: &str = "archive.zip";

/// Encrypted archive inside a staging directory
const SEALED_NAME: &str = "archive.kpk";

/// Return `Cancelled` once the caller asked to stop
fn checkpoint(cancel: &CancelToken) -> Result<(), BackupError> {
    if cancel.is_cancelled() {
        Err(BackupError::Cancelled)
    } else {
        Ok(())
    }
}

/// Keyword accepted by [`BackupService::resolve`] for the newest backup
pub const LATEST: &str = "latest";

/// Outcome of deleting one backup
///
/// The catalog record is always gone once this is returned; the blob
/// fields say whether each underlying copy was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionReport {
    pub backup_id: BackupId,
    pub local_removed: bool,
    pub remote_removed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
}

impl DeletionReport {
    fn new(backup_id: BackupId) -> Self {
        Self {
            backup_id,
            local_removed: false,
            remote_removed: false,
            local_error: None,
            remote_error: None,
        }
    }

    /// Whether every blob the record referenced was removed
    pub fn is_clean(&self) -> bool {
        self.local_error.is_none() && self.remote_error.is_none()
    }
}

/// Entry point for every backup operation
#[derive(Clone)]
pub struct BackupService {
    paths: KeepsakePaths,
    settings: Settings,
    keys: Arc<dyn KeyProvider>,
    remote: Option<Arc<dyn RemoteStore>>,
    catalog: Catalog,
    guard: OperationGuard,
    audit: AuditLogger,
}

impl std::fmt::Debug for BackupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupService")
            .field("base_dir", self.paths.base_dir())
            .field("remote", &self.remote.as_ref().map(|r| r.name().to_string()))
            .field("busy", &self.guard.is_busy())
            .finish()
    }
}

impl BackupService {
    /// Assemble a service from explicit parts
    pub fn new(
        paths: KeepsakePaths,
        settings: Settings,
        keys: Arc<dyn KeyProvider>,
        remote: Option<Arc<dyn RemoteStore>>,
    ) -> Self {
        Self {
            catalog: Catalog::new(paths.catalog_file()),
            audit: AuditLogger::new(paths.audit_log()),
            guard: OperationGuard::new(paths.lock_file()),
            paths,
            settings,
            keys,
            remote,
        }
    }

    /// Open the service over an on-disk layout, initializing it on first use
    ///
    /// Uses the device key provider and a directory remote store rooted at
    /// the configured remote directory.
    pub fn open(paths: KeepsakePaths) -> Result<Self, BackupError> {
        paths.ensure_directories().map_err(BackupError::from_setup)?;
        let settings = Settings::load_or_create(&paths).map_err(BackupError::from_setup)?;
        if !paths.is_initialized() {
            settings.save(&paths).map_err(BackupError::from_setup)?;
            info!(base_dir = %paths.base_dir().display(), "Initialized keepsake directory");
        }

        let keys = DeviceKeyProvider::new(paths.device_key_file(), settings.key_params.clone());
        let remote = DirectoryStore::new(settings.remote.resolve_directory(&paths));
        Ok(Self::new(
            paths,
            settings,
            Arc::new(keys),
            Some(Arc::new(remote)),
        ))
    }

    /// Replace the remote store
    pub fn with_remote(mut self, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        self.remote = remote;
        self
    }

    pub fn paths(&self) -> &KeepsakePaths {
        &self.paths
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Name of the configured remote store, if any
    pub fn remote_name(&self) -> Option<&str> {
        self.remote.as_deref().map(|r| r.name())
    }

    /// Whether an operation is in flight on this service or a clone of it
    pub fn is_busy(&self) -> bool {
        self.guard.is_busy()
    }

    /// All backups, newest first
    pub fn list(&self) -> Result<Vec<BackupRecord>, BackupError> {
        let mut records = self.catalog.list().map_err(BackupError::from_catalog)?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    pub fn get(&self, id: &BackupId) -> Result<BackupRecord, BackupError> {
        self.catalog
            .get(id)
            .map_err(BackupError::from_catalog)?
            .ok_or_else(|| BackupError::backup_not_found(id.to_string()))
    }

    /// The newest backup, if any
    pub fn latest(&self) -> Result<Option<BackupRecord>, BackupError> {
        Ok(self.list()?.into_iter().next())
    }

    /// Find a backup by full id, unique id prefix or `latest`
    pub fn resolve(&self, query: &str) -> Result<BackupRecord, BackupError> {
        if query.eq_ignore_ascii_case(LATEST) {
            return self
                .latest()?
                .ok_or_else(|| BackupError::backup_not_found(LATEST));
        }
        if let Ok(id) = BackupId::parse(query) {
            return self.get(&id);
        }

        let mut matches = self.catalog.find(query).map_err(BackupError::from_catalog)?;
        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(BackupError::backup_not_found(query)),
            n => Err(BackupError::backup_not_found(format!(
                "{} (ambiguous, matches {} backups)",
                query, n
            ))),
        }
    }

    /// Remove a backup's catalog record and then its blobs
    ///
    /// The record is removed before either blob. Blob failures are
    /// reported in the returned [`DeletionReport`], not raised.
    pub fn delete_backup(&self, id: &BackupId) -> Result<DeletionReport, BackupError> {
        let _permit = self.guard.try_acquire()?;
        let result = self.delete_locked(id);
        if let Err(err) = &result {
            self.audit.record(&AuditEntry::failed("delete", Some(id), err));
        }
        result
    }

    /// Delete every backup except the `keep` newest
    pub fn prune(&self, keep: usize) -> Result<Vec<DeletionReport>, BackupError> {
        let _permit = self.guard.try_acquire()?;
        let mut records = self.catalog.list().map_err(BackupError::from_catalog)?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut reports = Vec::new();
        for record in records.into_iter().skip(keep) {
            reports.push(self.delete_locked(&record.id)?);
        }
        info!(kept = keep, deleted = reports.len(), "Pruned backups");
        Ok(reports)
    }

    /// Backups `prune` would delete with the configured retention
    pub fn prune_candidates(&self, keep: usize) -> Result<Vec<BackupRecord>, BackupError> {
        Ok(self.list()?.into_iter().skip(keep).collect())
    }

    fn delete_locked(&self, id: &BackupId) -> Result<DeletionReport, BackupError> {
        let record = self
            .catalog
            .remove(id)
            .map_err(BackupError::from_catalog)?
            .ok_or_else(|| BackupError::backup_not_found(id.to_string()))?;

        let mut report = DeletionReport::new(record.id);

        match &record.local_archive_path {
            None => report.local_removed = true,
            Some(path) => match remove_file_if_exists(path) {
                Ok(existed) => {
                    if !existed {
                        warn!(backup_id = %record.id, path = %path.display(), "Local archive was already gone");
                    }
                    report.local_removed = true;
                }
                Err(e) => {
                    warn!(backup_id = %record.id, error = %e, "Failed to delete local archive");
                    report.local_error = Some(e.to_string());
                }
            },
        }

        match (&record.remote_id, &self.remote) {
            (None, _) => report.remote_removed = true,
            (Some(_), None) => {
                report.remote_error = Some("No remote store configured".to_string());
            }
            (Some(remote_id), Some(store)) => match store.delete(remote_id) {
                Ok(()) => report.remote_removed = true,
                Err(RemoteError::NotFound(_)) => {
                    warn!(backup_id = %record.id, remote_id = %remote_id, "Remote blob was already gone");
                    report.remote_removed = true;
                }
                Err(e) => {
                    warn!(backup_id = %record.id, error = %e, "Failed to delete remote blob");
                    report.remote_error = Some(e.to_string());
                }
            },
        }

        self.audit.record(&AuditEntry::deleted(&record, &report));
        info!(backup_id = %record.id, clean = report.is_clean(), "Deleted backup");
        Ok(report)
    }
}
