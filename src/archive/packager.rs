//! Collection and compression
//!
//! Source files are first copied into a staging `payload/` tree so the
//! archive reflects one consistent snapshot, then packed into a zip with
//! fixed timestamps and permissions so identical inputs yield identical
//! archives.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::manifest::{copy_hashed, Manifest, ManifestEntry, MANIFEST_NAME};
use super::ArchiveProgress;
use crate::backup::BackupError;
use crate::config::paths::{DATA_DIR_NAME, MEDIA_DIR_NAME};

const WRITE_CHUNK: usize = 64 * 1024;

/// Snapshot of the source files, staged on disk
#[derive(Debug, Clone)]
pub struct Collection {
    /// Staging root holding `data/` and `media/` copies
    pub payload: PathBuf,
    /// Staged files in archive order
    pub files: Vec<ManifestEntry>,
    pub total_size_bytes: u64,
    pub includes_media: bool,
}

impl Collection {
    pub fn file_count(&self) -> u64 {
        self.files.len() as u64
    }
}

struct Pending {
    source: PathBuf,
    archive_path: String,
}

/// Copy the records under `data_dir` (and media under `media_dir` when
/// given) into `payload`, hashing each file on the way
///
/// A missing data directory is a collection failure; a missing media
/// directory simply contributes no files.
pub fn collect(
    data_dir: &Path,
    media_dir: Option<&Path>,
    payload: &Path,
    on_progress: ArchiveProgress<'_>,
) -> Result<Collection, BackupError> {
    if !data_dir.is_dir() {
        return Err(BackupError::Collection(format!(
            "Data directory not found: {}",
            data_dir.display()
        )));
    }

    let mut pending = Vec::new();
    enumerate(DATA_DIR_NAME, data_dir, &mut pending)?;
    if let Some(media_dir) = media_dir {
        if media_dir.is_dir() {
            enumerate(MEDIA_DIR_NAME, media_dir, &mut pending)?;
        }
    }

    fs::create_dir_all(payload.join(DATA_DIR_NAME))
        .map_err(|e| BackupError::Preparation(format!("Failed to create payload directory: {}", e)))?;

    let total = pending.len() as u64;
    let mut files = Vec::with_capacity(pending.len());
    let mut total_size_bytes = 0u64;

    for (index, item) in pending.iter().enumerate() {
        let dest = payload.join(&item.archive_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BackupError::Collection(format!("Failed to stage {}: {}", item.archive_path, e))
            })?;
        }

        let mut source = File::open(&item.source).map_err(|e| {
            BackupError::Collection(format!("Failed to read {}: {}", item.source.display(), e))
        })?;
        let mut staged = File::create(&dest).map_err(|e| {
            BackupError::Collection(format!("Failed to stage {}: {}", item.archive_path, e))
        })?;
        let (size, sha256) = copy_hashed(&mut source, &mut staged).map_err(|e| {
            BackupError::Collection(format!("Failed to copy {}: {}", item.source.display(), e))
        })?;

        total_size_bytes += size;
        files.push(ManifestEntry {
            path: item.archive_path.clone(),
            size,
            sha256,
        });

        if on_progress(index as u64 + 1, total, Some(&item.archive_path)).is_break() {
            return Err(BackupError::Cancelled);
        }
    }

    debug!(files = files.len(), bytes = total_size_bytes, "Collected source files");

    Ok(Collection {
        payload: payload.to_path_buf(),
        files,
        total_size_bytes,
        includes_media: media_dir.is_some(),
    })
}

fn enumerate(root_name: &str, dir: &Path, out: &mut Vec<Pending>) -> Result<(), BackupError> {
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            BackupError::Collection(format!("Failed to scan {}: {}", dir.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(dir).map_err(|e| {
            BackupError::Collection(format!("Unexpected path {}: {}", entry.path().display(), e))
        })?;
        out.push(Pending {
            source: entry.path().to_path_buf(),
            archive_path: archive_path(root_name, relative)?,
        });
    }
    Ok(())
}

/// `/`-joined archive path for a file relative to its source root
fn archive_path(root_name: &str, relative: &Path) -> Result<String, BackupError> {
    let mut path = String::from(root_name);
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    BackupError::Collection(format!(
                        "File name is not valid UTF-8: {}",
                        relative.display()
                    ))
                })?;
                path.push('/');
                path.push_str(part);
            }
            _ => {
                return Err(BackupError::Collection(format!(
                    "Unsupported path component in {}",
                    relative.display()
                )))
            }
        }
    }
    Ok(path)
}

/// Pack the staged files plus `manifest` into a zip at `dest`, returning
/// the archive size
///
/// Progress is reported in uncompressed bytes against the manifest total.
pub fn compress(
    collection: &Collection,
    manifest: &Manifest,
    dest: &Path,
    compression_level: i64,
    on_progress: ArchiveProgress<'_>,
) -> Result<u64, BackupError> {
    let compression_err = |context: &str, e: &dyn std::fmt::Display| {
        BackupError::Compression(format!("{}: {}", context, e))
    };

    let file = File::create(dest).map_err(|e| compression_err("Failed to create archive", &e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    let method = if compression_level == 0 {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    };
    let base_options = SimpleFileOptions::default()
        .compression_method(method)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);
    let base_options = if compression_level == 0 {
        base_options
    } else {
        base_options.compression_level(Some(compression_level))
    };

    let manifest_json = manifest
        .to_json()
        .map_err(|e| compression_err("Failed to serialize manifest", &e))?;
    zip.start_file(MANIFEST_NAME, base_options)
        .map_err(|e| compression_err("Failed to start manifest entry", &e))?;
    zip.write_all(&manifest_json)
        .map_err(|e| compression_err("Failed to write manifest", &e))?;

    let total = collection.total_size_bytes;
    let mut done = 0u64;
    let mut buf = vec![0u8; WRITE_CHUNK];

    for entry in &collection.files {
        let options = base_options.large_file(entry.size >= u32::MAX as u64);
        zip.start_file(entry.path.as_str(), options)
            .map_err(|e| compression_err(&format!("Failed to start entry {}", entry.path), &e))?;

        let mut staged = File::open(collection.payload.join(&entry.path))
            .map_err(|e| compression_err(&format!("Failed to open staged {}", entry.path), &e))?;
        loop {
            let n = staged
                .read(&mut buf)
                .map_err(|e| compression_err(&format!("Failed to read staged {}", entry.path), &e))?;
            if n == 0 {
                break;
            }
            zip.write_all(&buf[..n])
                .map_err(|e| compression_err(&format!("Failed to write entry {}", entry.path), &e))?;
            done += n as u64;
            if on_progress(done, total, Some(&entry.path)).is_break() {
                return Err(BackupError::Cancelled);
            }
        }
    }

    let mut writer = zip
        .finish()
        .map_err(|e| compression_err("Failed to finish archive", &e))?;
    writer
        .flush()
        .map_err(|e| compression_err("Failed to flush archive", &e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| compression_err("Failed to sync archive", &e))?;

    let size = fs::metadata(dest)
        .map_err(|e| compression_err("Failed to stat archive", &e))?
        .len();
    debug!(entries = collection.files.len(), bytes = size, "Compressed archive");
    Ok(size)
}
