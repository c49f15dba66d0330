//! Restore orchestrator
//!
//! The whole archive is authenticated before any of it is decompressed, and
//! live data is only touched once the unpacked tree has passed validation.
//! The final swap renames directories within the base directory, so it
//! either completes or is rolled back.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{checkpoint, BackupError, BackupService, RestoreError, SEALED_NAME, ZIP_NAME};
use crate::archive::{self, Manifest};
use crate::audit::AuditEntry;
use crate::config::paths::{DATA_DIR_NAME, MEDIA_DIR_NAME};
use crate::crypto::{decrypt_stream, DerivedKey};
use crate::models::{BackupId, BackupRecord};
use crate::progress::{CancelToken, ProgressReporter, ProgressSink, Stage, StageSpan};
use crate::storage::remove_dir_if_exists;

const STAGING_PREFIX: &str = ".restore-";
const UNPACKED_DIR: &str = "unpacked";
const PARKED_DIR: &str = "previous";

/// Result of checking a backup without applying it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub backup_id: BackupId,
    pub from_remote: bool,
    pub file_count: u64,
    pub total_size_bytes: u64,
    pub includes_media: bool,
    /// Timestamp written into the archive manifest
    pub archived_at: DateTime<Utc>,
}

fn plan() -> Vec<StageSpan> {
    vec![
        StageSpan { stage: Stage::Preparing, start: 0, end: 2 },
        StageSpan { stage: Stage::Collecting, start: 2, end: 30 },
        StageSpan { stage: Stage::Encrypting, start: 30, end: 60 },
        StageSpan { stage: Stage::Compressing, start: 60, end: 99 },
    ]
}

impl BackupService {
    /// Replace live data with the contents of a backup
    ///
    /// With `from_remote` the archive is downloaded, otherwise the retained
    /// local archive is used.
    pub fn restore_backup(
        &self,
        id: &BackupId,
        from_remote: bool,
        on_progress: &mut dyn ProgressSink,
    ) -> Result<(), RestoreError> {
        self.restore_backup_with_cancel(id, from_remote, on_progress, &CancelToken::new())
    }

    /// [`restore_backup`](Self::restore_backup) that stops before the swap
    /// once `cancel` fires
    pub fn restore_backup_with_cancel(
        &self,
        id: &BackupId,
        from_remote: bool,
        on_progress: &mut dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<(), RestoreError> {
        let _permit = self.guard.try_acquire()?;
        let mut reporter = ProgressReporter::new(on_progress, plan());
        info!(backup_id = %id, from_remote, "Starting restore");

        match self.run_restore(id, from_remote, &mut reporter, cancel) {
            Ok(record) => {
                reporter.complete();
                self.audit.record(&AuditEntry::restored(&record, from_remote));
                info!(backup_id = %id, files = record.file_count, "Restore complete");
                Ok(())
            }
            Err(err) => {
                reporter.fail();
                warn!(backup_id = %id, kind = %err.kind(), error = %err, "Restore failed");
                self.audit.record(&AuditEntry::failed("restore", Some(id), &err));
                Err(err)
            }
        }
    }

    /// Download or read, decrypt and validate a backup without touching
    /// live data
    pub fn verify_backup(
        &self,
        id: &BackupId,
        from_remote: bool,
        on_progress: &mut dyn ProgressSink,
    ) -> Result<VerificationReport, BackupError> {
        let _permit = self.guard.try_acquire()?;
        let mut reporter = ProgressReporter::new(on_progress, plan());
        let cancel = CancelToken::new();

        match self.run_verify(id, from_remote, &mut reporter, &cancel) {
            Ok(report) => {
                reporter.complete();
                info!(backup_id = %id, files = report.file_count, "Backup verified");
                Ok(report)
            }
            Err(err) => {
                reporter.fail();
                warn!(backup_id = %id, kind = %err.kind(), error = %err, "Verification failed");
                self.audit.record(&AuditEntry::failed("verify", Some(id), &err));
                Err(err)
            }
        }
    }

    fn run_verify(
        &self,
        id: &BackupId,
        from_remote: bool,
        reporter: &mut ProgressReporter<'_>,
        cancel: &CancelToken,
    ) -> Result<VerificationReport, BackupError> {
        reporter.enter(Stage::Preparing);
        let record = self.get(id)?;
        let staging = self.restore_staging()?;
        let manifest = self.unpack(&record, from_remote, staging.path(), reporter, cancel)?;
        Ok(VerificationReport {
            backup_id: record.id,
            from_remote,
            file_count: manifest.file_count(),
            total_size_bytes: manifest.total_size(),
            includes_media: manifest.includes_media,
            archived_at: manifest.created_at,
        })
    }

    fn run_restore(
        &self,
        id: &BackupId,
        from_remote: bool,
        reporter: &mut ProgressReporter<'_>,
        cancel: &CancelToken,
    ) -> Result<BackupRecord, BackupError> {
        reporter.enter(Stage::Preparing);
        let record = self.get(id)?;
        let staging = self.restore_staging()?;

        let manifest = self.unpack(&record, from_remote, staging.path(), reporter, cancel)?;
        checkpoint(cancel)?;

        let mut roots = vec![DATA_DIR_NAME];
        if manifest.includes_media {
            roots.push(MEDIA_DIR_NAME);
        }
        swap_into_place(
            &staging.path().join(UNPACKED_DIR),
            self.paths.base_dir(),
            &roots,
            &staging.path().join(PARKED_DIR),
        )?;
        Ok(record)
    }

    /// Staging directory beside the live data, so the swap is a rename
    fn restore_staging(&self) -> Result<tempfile::TempDir, BackupError> {
        let base = self.paths.base_dir();
        fs::create_dir_all(base)
            .map_err(|e| BackupError::Preparation(format!("Failed to create base directory: {}", e)))?;
        tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(base)
            .map_err(|e| BackupError::Preparation(format!("Failed to create staging directory: {}", e)))
    }

    /// Fetch, decrypt and unpack `record` into `staging/unpacked`
    fn unpack(
        &self,
        record: &BackupRecord,
        from_remote: bool,
        staging: &Path,
        reporter: &mut ProgressReporter<'_>,
        cancel: &CancelToken,
    ) -> Result<Manifest, BackupError> {
        let key = self.keys.existing_archive_key().map_err(BackupError::from_setup)?;
        checkpoint(cancel)?;

        reporter.enter(Stage::Collecting);
        let sealed = if from_remote {
            self.download(record, &staging.join(SEALED_NAME), reporter, cancel)?
        } else {
            let path = record.local_archive().ok_or_else(|| BackupError::NotFound {
                entity_type: "Local archive",
                identifier: record.id.to_string(),
            })?;
            reporter.advance(1, 1, Some(&path.display().to_string()));
            path.to_path_buf()
        };
        checkpoint(cancel)?;

        reporter.enter(Stage::Encrypting);
        let zip_path = staging.join(ZIP_NAME);
        open_sealed(&sealed, &zip_path, &key, reporter, cancel)?;
        drop(key);
        checkpoint(cancel)?;

        reporter.enter(Stage::Compressing);
        let manifest = archive::extract(
            &zip_path,
            &staging.join(UNPACKED_DIR),
            &mut |done: u64, total: u64, item: Option<&str>| {
                reporter.advance(done, total, item);
                cancel.flow()
            },
        )?;

        if manifest.file_count() != record.file_count
            || manifest.total_size() != record.total_size_bytes
        {
            return Err(BackupError::Validation(format!(
                "Archive holds {} files ({} bytes) but the catalog recorded {} files ({} bytes)",
                manifest.file_count(),
                manifest.total_size(),
                record.file_count,
                record.total_size_bytes
            )));
        }
        Ok(manifest)
    }

    fn download(
        &self,
        record: &BackupRecord,
        dest: &Path,
        reporter: &mut ProgressReporter<'_>,
        cancel: &CancelToken,
    ) -> Result<PathBuf, BackupError> {
        let remote_id = record.remote_id.as_ref().ok_or_else(|| BackupError::NotFound {
            entity_type: "Remote copy of backup",
            identifier: record.id.to_string(),
        })?;
        let store = self
            .remote
            .as_deref()
            .ok_or_else(|| BackupError::Config("No remote store configured".to_string()))?;

        let file = File::create(dest)
            .map_err(|e| BackupError::Preparation(format!("Failed to create download file: {}", e)))?;
        let mut writer = BufWriter::new(file);

        let total = record.archive_size_bytes;
        let mut received = 0u64;
        let bytes = store.download(remote_id, &mut writer, &mut |n: u64| {
            received += n;
            reporter.advance(received, total, Some(remote_id.as_str()));
            cancel.flow()
        })?;
        writer
            .flush()
            .map_err(|e| BackupError::Preparation(format!("Failed to write download file: {}", e)))?;

        debug!(backup_id = %record.id, remote_id = %remote_id, bytes, "Downloaded archive");
        Ok(dest.to_path_buf())
    }
}

/// Decrypt `sealed` into `dest`, authenticating every chunk
fn open_sealed(
    sealed: &Path,
    dest: &Path,
    key: &DerivedKey,
    reporter: &mut ProgressReporter<'_>,
    cancel: &CancelToken,
) -> Result<u64, BackupError> {
    let source = File::open(sealed)
        .map_err(|e| BackupError::Encryption(format!("Failed to open archive: {}", e)))?;
    let total = source
        .metadata()
        .map_err(|e| BackupError::Encryption(format!("Failed to stat archive: {}", e)))?
        .len();
    let target = File::create(dest)
        .map_err(|e| BackupError::Preparation(format!("Failed to create staging file: {}", e)))?;
    let mut reader = BufReader::new(source);
    let mut writer = BufWriter::new(target);

    let mut done = 0u64;
    let plaintext = decrypt_stream(&mut reader, &mut writer, key, &mut |n: u64| {
        done += n;
        reporter.advance(done, total, None);
        cancel.flow()
    })
    .map_err(BackupError::from_opening)?;

    writer
        .flush()
        .map_err(|e| BackupError::Preparation(format!("Failed to write staging file: {}", e)))?;
    Ok(plaintext)
}

/// Move each staged root over its live counterpart, all or nothing
///
/// Live directories are parked under `parked` first; on any failure the
/// roots already swapped are put back.
fn swap_into_place(
    staged: &Path,
    live_base: &Path,
    roots: &[&str],
    parked: &Path,
) -> Result<(), BackupError> {
    let swap_err = |root: &str, e: std::io::Error| {
        BackupError::Preparation(format!("Failed to replace live {}: {}", root, e))
    };
    fs::create_dir_all(parked).map_err(|e| swap_err("staging", e))?;

    let mut swapped: Vec<(PathBuf, Option<PathBuf>)> = Vec::new();
    for &root in roots {
        let live = live_base.join(root);
        let incoming = staged.join(root);
        let previous = parked.join(root);

        let had_live = live.exists();
        if had_live {
            if let Err(e) = fs::rename(&live, &previous) {
                roll_back(&swapped);
                return Err(swap_err(root, e));
            }
        }
        if let Err(e) = fs::rename(&incoming, &live) {
            if had_live {
                if let Err(e) = fs::rename(&previous, &live) {
                    warn!(root = %root, error = %e, "Failed to put back live directory");
                }
            }
            roll_back(&swapped);
            return Err(swap_err(root, e));
        }
        swapped.push((live, had_live.then_some(previous)));
    }
    Ok(())
}

fn roll_back(swapped: &[(PathBuf, Option<PathBuf>)]) {
    for (live, previous) in swapped.iter().rev() {
        if let Err(e) = remove_dir_if_exists(live) {
            warn!(path = %live.display(), error = %e, "Failed to remove partially restored directory");
            continue;
        }
        if let Some(previous) = previous {
            if let Err(e) = fs::rename(previous, live) {
                warn!(path = %live.display(), error = %e, "Failed to roll back live directory");
            }
        }
    }
}
