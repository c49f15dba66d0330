//! Archive extraction and validation

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::debug;
use zip::ZipArchive;

use super::manifest::{copy_hashed, Manifest, ManifestEntry, MANIFEST_FORMAT_VERSION, MANIFEST_NAME};
use super::ArchiveProgress;
use crate::backup::BackupError;
use crate::config::paths::{DATA_DIR_NAME, MEDIA_DIR_NAME};

/// Unpack the zip at `archive` into `dest`, checking every entry against
/// the manifest
///
/// Fails with `Validation` when the manifest is missing or malformed, an
/// entry escapes `dest`, or file count, sizes or digests disagree with the
/// manifest. Unreadable zip structure is a `Compression` failure.
pub fn extract(
    archive: &Path,
    dest: &Path,
    on_progress: ArchiveProgress<'_>,
) -> Result<Manifest, BackupError> {
    let file = File::open(archive)
        .map_err(|e| BackupError::Compression(format!("Failed to open archive: {}", e)))?;
    let mut zip = ZipArchive::new(BufReader::new(file))
        .map_err(|e| BackupError::Compression(format!("Failed to read archive: {}", e)))?;

    let manifest = read_manifest(&mut zip)?;
    let expected = index_entries(&manifest)?;

    let entry_count = zip.len().saturating_sub(1) as u64;
    if entry_count != manifest.file_count() {
        return Err(BackupError::Validation(format!(
            "Archive holds {} files but the manifest lists {}",
            entry_count,
            manifest.file_count()
        )));
    }

    fs::create_dir_all(dest.join(DATA_DIR_NAME))
        .map_err(|e| BackupError::Preparation(format!("Failed to create restore staging: {}", e)))?;
    if manifest.includes_media {
        fs::create_dir_all(dest.join(MEDIA_DIR_NAME)).map_err(|e| {
            BackupError::Preparation(format!("Failed to create restore staging: {}", e))
        })?;
    }

    let total = manifest.total_size();
    let mut done = 0u64;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| BackupError::Compression(format!("Failed to read entry {}: {}", index, e)))?;
        let name = entry.name().to_string();
        if name == MANIFEST_NAME {
            continue;
        }

        let relative = entry
            .enclosed_name()
            .ok_or_else(|| BackupError::Validation(format!("Entry escapes archive root: {}", name)))?;
        let expected_entry = expected
            .get(name.as_str())
            .ok_or_else(|| BackupError::Validation(format!("Unexpected archive entry: {}", name)))?;
        if entry.is_dir() {
            return Err(BackupError::Validation(format!(
                "Directory entry where a file was expected: {}",
                name
            )));
        }

        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BackupError::Preparation(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let mut out = File::create(&target).map_err(|e| {
            BackupError::Preparation(format!("Failed to write {}: {}", target.display(), e))
        })?;
        let (size, sha256) = copy_hashed(&mut entry, &mut out)
            .map_err(|e| BackupError::Compression(format!("Failed to decompress {}: {}", name, e)))?;

        if size != expected_entry.size {
            return Err(BackupError::Validation(format!(
                "Size mismatch for {}: expected {} bytes, found {}",
                name, expected_entry.size, size
            )));
        }
        if sha256 != expected_entry.sha256 {
            return Err(BackupError::Validation(format!("Checksum mismatch for {}", name)));
        }

        done += size;
        if on_progress(done, total, Some(&name)).is_break() {
            return Err(BackupError::Cancelled);
        }
    }

    debug!(files = manifest.files.len(), bytes = total, "Extracted archive");
    Ok(manifest)
}

fn read_manifest<R>(zip: &mut ZipArchive<R>) -> Result<Manifest, BackupError>
where
    R: Read + std::io::Seek,
{
    let mut entry = zip
        .by_name(MANIFEST_NAME)
        .map_err(|_| BackupError::Validation("Archive has no manifest".to_string()))?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| BackupError::Compression(format!("Failed to read manifest: {}", e)))?;

    let manifest = Manifest::from_json(&bytes)
        .map_err(|e| BackupError::Validation(format!("Malformed manifest: {}", e)))?;
    if manifest.format_version > MANIFEST_FORMAT_VERSION {
        return Err(BackupError::Validation(format!(
            "Unsupported manifest version {}",
            manifest.format_version
        )));
    }
    Ok(manifest)
}

/// Map manifest paths to entries, rejecting duplicates and paths outside
/// the known roots
fn index_entries(manifest: &Manifest) -> Result<HashMap<&str, &ManifestEntry>, BackupError> {
    let mut expected = HashMap::with_capacity(manifest.files.len());
    for entry in &manifest.files {
        let rooted = entry
            .path
            .split_once('/')
            .map(|(root, rest)| {
                (root == DATA_DIR_NAME || (root == MEDIA_DIR_NAME && manifest.includes_media))
                    && !rest.is_empty()
            })
            .unwrap_or(false);
        let escapes = entry
            .path
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..")
            || entry.path.contains('\\');
        if !rooted || escapes {
            return Err(BackupError::Validation(format!(
                "Manifest lists an invalid path: {}",
                entry.path
            )));
        }
        if expected.insert(entry.path.as_str(), entry).is_some() {
            return Err(BackupError::Validation(format!(
                "Manifest lists {} twice",
                entry.path
            )));
        }
    }
    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{collect, compress};
    use crate::backup::ErrorKind;
    use chrono::Utc;
    use std::io::Write;
    use std::ops::ControlFlow;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn keep_going(_: u64, _: u64, _: Option<&str>) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn build_archive(temp: &Path) -> std::path::PathBuf {
        let data = temp.join("src-data");
        let media = temp.join("src-media");
        fs::create_dir_all(data.join("sub")).unwrap();
        fs::create_dir_all(&media).unwrap();
        fs::write(data.join("one.json"), b"{\"id\":1}").unwrap();
        fs::write(data.join("sub").join("two.json"), b"{\"id\":2}").unwrap();
        fs::write(media.join("clip.m4a"), vec![3u8; 5000]).unwrap();

        let collection = collect(&data, Some(&media), &temp.join("payload"), &mut keep_going).unwrap();
        let manifest = Manifest::new(Utc::now(), true, collection.files.clone());
        let archive = temp.join("archive.zip");
        compress(&collection, &manifest, &archive, 6, &mut keep_going).unwrap();
        archive
    }

    /// Write a zip by hand from (name, bytes) pairs and a manifest
    fn forge(path: &Path, manifest: &Manifest, entries: &[(&str, &[u8])]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default();
        zip.start_file(MANIFEST_NAME, options).unwrap();
        zip.write_all(&manifest.to_json().unwrap()).unwrap();
        for (name, bytes) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap();
    }

    fn entry_for(path: &str, bytes: &[u8]) -> ManifestEntry {
        let (size, sha256) = copy_hashed(&mut &bytes[..], &mut std::io::sink()).unwrap();
        ManifestEntry {
            path: path.to_string(),
            size,
            sha256,
        }
    }

    #[test]
    fn test_extract_round_trip() {
        let temp = TempDir::new().unwrap();
        let archive = build_archive(temp.path());
        let dest = temp.path().join("out");

        let manifest = extract(&archive, &dest, &mut keep_going).unwrap();
        assert_eq!(manifest.file_count(), 3);
        assert_eq!(fs::read(dest.join("data/one.json")).unwrap(), b"{\"id\":1}");
        assert_eq!(fs::read(dest.join("data/sub/two.json")).unwrap(), b"{\"id\":2}");
        assert_eq!(fs::read(dest.join("media/clip.m4a")).unwrap().len(), 5000);
    }

    #[test]
    fn test_checksum_mismatch() {
        let temp = TempDir::new().unwrap();
        let entry = entry_for("data/a.json", b"original");
        let manifest = Manifest::new(Utc::now(), false, vec![entry]);
        let archive = temp.path().join("forged.zip");
        forge(&archive, &manifest, &[("data/a.json", &b"tampered"[..])]);

        let err = extract(&archive, &temp.path().join("out"), &mut keep_going).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        let manifest = Manifest::new(
            Utc::now(),
            false,
            vec![entry_for("data/a.json", b"a"), entry_for("data/b.json", b"b")],
        );
        let archive = temp.path().join("short.zip");
        forge(&archive, &manifest, &[("data/a.json", &b"a"[..])]);

        let err = extract(&archive, &temp.path().join("out"), &mut keep_going).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_path_escape_rejected() {
        let temp = TempDir::new().unwrap();
        let manifest = Manifest::new(Utc::now(), false, vec![entry_for("data/../../evil", b"x")]);
        let archive = temp.path().join("escape.zip");
        forge(&archive, &manifest, &[("data/../../evil", &b"x"[..])]);

        let err = extract(&archive, &temp.path().join("out"), &mut keep_going).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!temp.path().join("evil").exists());
    }

    #[test]
    fn test_missing_manifest() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("bare.zip");
        let mut zip = ZipWriter::new(File::create(&archive).unwrap());
        zip.start_file("data/a.json", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"{}").unwrap();
        zip.finish().unwrap();

        let err = extract(&archive, &temp.path().join("out"), &mut keep_going).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_not_a_zip() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("junk.zip");
        fs::write(&archive, b"definitely not a zip file").unwrap();
        let err = extract(&archive, &temp.path().join("out"), &mut keep_going).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compression);
    }
}
