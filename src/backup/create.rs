//! Backup orchestrator

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{checkpoint, BackupError, BackupService, SEALED_NAME, ZIP_NAME};
use crate::archive::{self, Manifest};
use crate::audit::AuditEntry;
use crate::config::paths::ARCHIVE_EXTENSION;
use crate::crypto::{encrypt_stream, DerivedKey};
use crate::models::{BackupId, BackupRecord};
use crate::progress::{CancelToken, ProgressReporter, ProgressSink, Stage, StageSpan};
use crate::remote::{RemoteId, RemoteStore};

const STAGING_PREFIX: &str = ".staging-";

/// Encrypted archive sitting in staging, not yet committed
struct Sealed {
    path: PathBuf,
    size: u64,
}

fn plan(upload: bool) -> Vec<StageSpan> {
    let encrypt_end = if upload { 85 } else { 99 };
    let mut plan = vec![
        StageSpan { stage: Stage::Preparing, start: 0, end: 2 },
        StageSpan { stage: Stage::Collecting, start: 2, end: 40 },
        StageSpan { stage: Stage::Compressing, start: 40, end: 65 },
        StageSpan { stage: Stage::Encrypting, start: 65, end: encrypt_end },
    ];
    if upload {
        plan.push(StageSpan { stage: Stage::Uploading, start: 85, end: 99 });
    }
    plan
}

impl BackupService {
    /// Snapshot live data into a new encrypted backup
    ///
    /// Collects `data/` (and `media/` when `include_media`), compresses and
    /// encrypts it, optionally uploads it, and commits a catalog record.
    /// If only the upload fails, the local archive is still committed as a
    /// local-only record and returned inside [`BackupError::Network`].
    pub fn create_backup(
        &self,
        include_media: bool,
        upload_remote: bool,
        on_progress: &mut dyn ProgressSink,
    ) -> Result<BackupRecord, BackupError> {
        self.create_backup_with_cancel(include_media, upload_remote, on_progress, &CancelToken::new())
    }

    /// [`create_backup`](Self::create_backup) that stops at the next file or
    /// chunk boundary once `cancel` fires
    pub fn create_backup_with_cancel(
        &self,
        include_media: bool,
        upload_remote: bool,
        on_progress: &mut dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<BackupRecord, BackupError> {
        let _permit = self.guard.try_acquire()?;
        let id = BackupId::new();
        let mut reporter = ProgressReporter::new(on_progress, plan(upload_remote));
        info!(backup_id = %id, include_media, upload_remote, "Starting backup");

        match self.run_create(id, include_media, upload_remote, &mut reporter, cancel) {
            Ok(record) => {
                reporter.complete();
                Ok(record)
            }
            Err(err) => {
                reporter.fail();
                warn!(backup_id = %id, kind = %err.kind(), error = %err, "Backup failed");
                self.audit.record(&AuditEntry::failed("create", Some(&id), &err));
                Err(err)
            }
        }
    }

    fn run_create(
        &self,
        id: BackupId,
        include_media: bool,
        upload_remote: bool,
        reporter: &mut ProgressReporter<'_>,
        cancel: &CancelToken,
    ) -> Result<BackupRecord, BackupError> {
        let created_at = Utc::now();
        let settings = &self.settings.backup;

        reporter.enter(Stage::Preparing);
        let remote = if upload_remote {
            let store = self
                .remote
                .clone()
                .ok_or_else(|| BackupError::Config("No remote store configured".to_string()))?;
            Some(store)
        } else {
            None
        };
        let backup_dir = self.paths.backup_dir();
        fs::create_dir_all(&backup_dir).map_err(|e| {
            BackupError::Preparation(format!("Failed to create backup directory: {}", e))
        })?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&backup_dir)
            .map_err(|e| BackupError::Preparation(format!("Failed to create staging directory: {}", e)))?;
        let key = self.keys.archive_key().map_err(BackupError::from_setup)?;
        checkpoint(cancel)?;

        reporter.enter(Stage::Collecting);
        let media_dir = self.paths.media_dir();
        let collection = archive::collect(
            &self.paths.data_dir(),
            include_media.then_some(media_dir.as_path()),
            &staging.path().join("payload"),
            &mut |done: u64, total: u64, item: Option<&str>| {
                reporter.advance(done, total, item);
                cancel.flow()
            },
        )?;
        checkpoint(cancel)?;

        reporter.enter(Stage::Compressing);
        let manifest = Manifest::new(created_at, include_media, collection.files.clone());
        let zip_path = staging.path().join(ZIP_NAME);
        let zip_size = archive::compress(
            &collection,
            &manifest,
            &zip_path,
            settings.compression_level,
            &mut |done: u64, total: u64, _: Option<&str>| {
                reporter.advance(done, total, None);
                cancel.flow()
            },
        )?;
        checkpoint(cancel)?;

        reporter.enter(Stage::Encrypting);
        let sealed = seal(
            &zip_path,
            &staging.path().join(SEALED_NAME),
            zip_size,
            &key,
            settings.chunk_size,
            reporter,
            cancel,
        )?;
        drop(key);
        checkpoint(cancel)?;

        let mut record = BackupRecord {
            id,
            created_at,
            file_count: collection.file_count(),
            total_size_bytes: collection.total_size_bytes,
            remote_id: None,
            is_encrypted: true,
            local_archive_path: None,
            includes_media: include_media,
            archive_size_bytes: sealed.size,
        };

        if let Some(store) = remote {
            reporter.enter(Stage::Uploading);
            match upload(store.as_ref(), &id, &sealed, reporter, cancel) {
                Ok(remote_id) => record.remote_id = Some(remote_id),
                Err(BackupError::Network { message, .. }) => {
                    warn!(backup_id = %id, error = %message, "Upload failed, keeping local archive");
                    record.local_archive_path = Some(self.place_archive(&sealed, &id)?);
                    self.commit(&record)?;
                    return Err(BackupError::Network {
                        message,
                        local_record: Some(Box::new(record)),
                    });
                }
                Err(err) => return Err(err),
            }

            if cancel.is_cancelled() {
                self.discard_blobs(&record);
                return Err(BackupError::Cancelled);
            }
        }

        if record.remote_id.is_none() || settings.keep_local_archive {
            match self.place_archive(&sealed, &id) {
                Ok(path) => record.local_archive_path = Some(path),
                Err(err) => {
                    self.discard_blobs(&record);
                    return Err(err);
                }
            }
        }

        self.commit(&record)?;
        Ok(record)
    }

    /// Move the sealed archive from staging to `backups/<id>.kpk`
    fn place_archive(&self, sealed: &Sealed, id: &BackupId) -> Result<PathBuf, BackupError> {
        let dest = self.paths.archive_file(&id.file_stem());
        fs::rename(&sealed.path, &dest)
            .map_err(|e| BackupError::Preparation(format!("Failed to store archive: {}", e)))?;
        Ok(dest)
    }

    /// Append the record to the catalog, removing its blobs if that fails
    fn commit(&self, record: &BackupRecord) -> Result<(), BackupError> {
        if let Err(e) = self.catalog.append(record) {
            self.discard_blobs(record);
            return Err(BackupError::from_catalog(e));
        }

        self.audit.record(&AuditEntry::created(record));
        info!(
            backup_id = %record.id,
            files = record.file_count,
            bytes = record.total_size_bytes,
            archive_bytes = record.archive_size_bytes,
            location = record.location_label(),
            "Backup committed"
        );
        Ok(())
    }

    /// Best-effort removal of blobs belonging to an uncommitted record
    fn discard_blobs(&self, record: &BackupRecord) {
        if let Some(path) = &record.local_archive_path {
            if let Err(e) = fs::remove_file(path) {
                warn!(backup_id = %record.id, error = %e, "Failed to remove uncommitted archive");
            }
        }
        if let (Some(remote_id), Some(store)) = (&record.remote_id, &self.remote) {
            if let Err(e) = store.delete(remote_id) {
                warn!(backup_id = %record.id, error = %e, "Failed to remove uncommitted remote blob");
            }
        }
    }
}

fn seal(
    zip_path: &Path,
    dest: &Path,
    zip_size: u64,
    key: &DerivedKey,
    chunk_size: u32,
    reporter: &mut ProgressReporter<'_>,
    cancel: &CancelToken,
) -> Result<Sealed, BackupError> {
    let source = File::open(zip_path)
        .map_err(|e| BackupError::Encryption(format!("Failed to open archive: {}", e)))?;
    let target = File::create(dest)
        .map_err(|e| BackupError::Encryption(format!("Failed to create sealed archive: {}", e)))?;
    let mut reader = BufReader::new(source);
    let mut writer = BufWriter::new(target);

    let mut done = 0u64;
    let size = encrypt_stream(&mut reader, &mut writer, key, chunk_size, &mut |n: u64| {
        done += n;
        reporter.advance(done, zip_size, None);
        cancel.flow()
    })
    .map_err(BackupError::from_sealing)?;

    writer
        .flush()
        .map_err(|e| BackupError::Encryption(format!("Failed to flush sealed archive: {}", e)))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| BackupError::Encryption(format!("Failed to sync sealed archive: {}", e)))?;

    debug!(plaintext = zip_size, ciphertext = size, "Sealed archive");
    Ok(Sealed {
        path: dest.to_path_buf(),
        size,
    })
}

fn upload(
    store: &dyn RemoteStore,
    id: &BackupId,
    sealed: &Sealed,
    reporter: &mut ProgressReporter<'_>,
    cancel: &CancelToken,
) -> Result<RemoteId, BackupError> {
    let name = format!("{}.{}", id.file_stem(), ARCHIVE_EXTENSION);
    let file = File::open(&sealed.path)
        .map_err(|e| BackupError::Encryption(format!("Failed to open sealed archive: {}", e)))?;
    let mut blob = BufReader::new(file);

    let mut sent = 0u64;
    let remote_id = store.upload(&name, &mut blob, sealed.size, &mut |n: u64| {
        sent += n;
        reporter.advance(sent, sealed.size, Some(&name));
        cancel.flow()
    })?;
    debug!(backup_id = %id, remote = store.name(), remote_id = %remote_id, "Uploaded archive");
    Ok(remote_id)
}
