//! Remote store backed by a directory
//!
//! Each blob is a file named after its object name. Uploads are written to a
//! hidden temp file and renamed into place, so a failed transfer never
//! leaves a partial object behind.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{
    copy_with_progress, validate_name, RemoteError, RemoteId, RemoteStore, TransferProgress,
};
use crate::storage::remove_file_if_exists;

/// Object store rooted at a local or mounted directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, id: &RemoteId) -> Result<PathBuf, RemoteError> {
        validate_name(id.as_str()).map_err(|_| RemoteError::NotFound(id.to_string()))?;
        Ok(self.root.join(id.as_str()))
    }

    /// Names of all stored objects
    pub fn list(&self) -> Result<Vec<RemoteId>, RemoteError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.root)
            .map_err(|e| RemoteError::Network(format!("Failed to list store: {}", e)))?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| RemoteError::Network(format!("Failed to list store: {}", e)))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if validate_name(&name).is_ok() && entry.path().is_file() {
                ids.push(RemoteId::new(name));
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}

impl RemoteStore for DirectoryStore {
    fn upload(
        &self,
        name: &str,
        blob: &mut dyn std::io::Read,
        len: u64,
        on_progress: TransferProgress<'_>,
    ) -> Result<RemoteId, RemoteError> {
        validate_name(name)?;
        fs::create_dir_all(&self.root)
            .map_err(|e| RemoteError::Network(format!("Remote store unavailable: {}", e)))?;

        let target = self.root.join(name);
        let partial = self.root.join(format!(".{}.partial", name));

        let result = (|| {
            let file = File::create(&partial)
                .map_err(|e| RemoteError::Network(format!("Failed to open upload: {}", e)))?;
            let mut writer = BufWriter::new(file);
            let copied = copy_with_progress(blob, &mut writer, on_progress)?;
            if copied != len {
                return Err(RemoteError::Network(format!(
                    "Upload length mismatch: expected {} bytes, sent {}",
                    len, copied
                )));
            }
            writer
                .flush()
                .map_err(|e| RemoteError::Network(format!("Failed to flush upload: {}", e)))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| RemoteError::Network(format!("Failed to sync upload: {}", e)))?;
            fs::rename(&partial, &target)
                .map_err(|e| RemoteError::Network(format!("Failed to publish upload: {}", e)))
        })();

        if let Err(err) = result {
            let _ = fs::remove_file(&partial);
            tracing::warn!(object = name, error = %err, "Upload to directory store failed");
            return Err(err);
        }

        Ok(RemoteId::new(name))
    }

    fn download(
        &self,
        id: &RemoteId,
        dest: &mut dyn Write,
        on_progress: TransferProgress<'_>,
    ) -> Result<u64, RemoteError> {
        let path = self.object_path(id)?;
        let mut file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RemoteError::NotFound(id.to_string())
            } else {
                RemoteError::Network(format!("Failed to open {}: {}", id, e))
            }
        })?;
        copy_with_progress(&mut file, dest, on_progress)
    }

    fn delete(&self, id: &RemoteId) -> Result<(), RemoteError> {
        let path = self.object_path(id)?;
        match remove_file_if_exists(&path) {
            Ok(true) => Ok(()),
            Ok(false) => Err(RemoteError::NotFound(id.to_string())),
            Err(e) => Err(RemoteError::Network(format!("Failed to delete {}: {}", id, e))),
        }
    }

    fn name(&self) -> &str {
        "directory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::ops::ControlFlow;
    use tempfile::TempDir;

    fn keep_going(_: u64) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    #[test]
    fn test_upload_download_delete() {
        let temp = TempDir::new().unwrap();
        let store = DirectoryStore::new(temp.path().join("remote"));
        let blob = vec![9u8; 200_000];

        let id = store
            .upload("a.kpk", &mut Cursor::new(&blob), blob.len() as u64, &mut keep_going)
            .unwrap();
        assert_eq!(id.as_str(), "a.kpk");
        assert_eq!(store.list().unwrap(), vec![id.clone()]);

        let mut out = Vec::new();
        let n = store.download(&id, &mut out, &mut keep_going).unwrap();
        assert_eq!(n, blob.len() as u64);
        assert_eq!(out, blob);

        store.delete(&id).unwrap();
        assert_eq!(store.delete(&id), Err(RemoteError::NotFound("a.kpk".into())));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_missing_object_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = DirectoryStore::new(temp.path());
        let mut out = Vec::new();
        let err = store
            .download(&RemoteId::new("nope.kpk"), &mut out, &mut keep_going)
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));

        let err = store
            .download(&RemoteId::new("../escape"), &mut out, &mut keep_going)
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    struct FailingReader {
        remaining: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.remaining == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
            }
            let n = buf.len().min(self.remaining);
            buf[..n].fill(1);
            self.remaining -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_failed_upload_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let store = DirectoryStore::new(temp.path());

        let err = store
            .upload(
                "b.kpk",
                &mut FailingReader { remaining: 100_000 },
                500_000,
                &mut keep_going,
            )
            .unwrap_err();
        assert!(matches!(err, RemoteError::Network(_)));
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_aborted_upload_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let store = DirectoryStore::new(temp.path());
        let blob = vec![1u8; 300_000];

        let err = store
            .upload("c.kpk", &mut Cursor::new(&blob), blob.len() as u64, &mut |_: u64| {
                ControlFlow::Break(())
            })
            .unwrap_err();
        assert_eq!(err, RemoteError::Aborted);
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }
}
