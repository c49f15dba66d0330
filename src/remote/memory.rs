//! In-process remote store
//!
//! Keeps blobs in memory. Failure switches let callers rehearse network
//! outages: taking the store offline, cutting uploads after a byte budget,
//! or refusing deletes.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{copy_with_progress, validate_name, RemoteError, RemoteId, RemoteStore, TransferProgress};

#[derive(Debug, Default)]
struct Faults {
    offline: bool,
    upload_byte_budget: Option<u64>,
    fail_deletes: bool,
}

/// Remote store holding blobs in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    faults: Mutex<Faults>,
    uploads: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every operation fail with a network error
    pub fn set_offline(&self, offline: bool) {
        self.faults().offline = offline;
    }

    /// Fail uploads once this many bytes have been transferred
    pub fn fail_uploads_after(&self, bytes: Option<u64>) {
        self.faults().upload_byte_budget = bytes;
    }

    /// Make deletes fail with a network error
    pub fn set_fail_deletes(&self, fail: bool) {
        self.faults().fail_deletes = fail;
    }

    /// Number of stored blobs
    pub fn object_count(&self) -> usize {
        self.objects().len()
    }

    pub fn contains(&self, id: &RemoteId) -> bool {
        self.objects().contains_key(id.as_str())
    }

    /// Copy of a stored blob
    pub fn get(&self, id: &RemoteId) -> Option<Vec<u8>> {
        self.objects().get(id.as_str()).cloned()
    }

    /// Replace a stored blob's bytes
    pub fn put_raw(&self, id: &RemoteId, bytes: Vec<u8>) {
        self.objects().insert(id.as_str().to_string(), bytes);
    }

    /// Number of successful uploads
    pub fn upload_count(&self) -> u64 {
        self.uploads.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.faults().offline {
            Err(RemoteError::Network("Remote store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl RemoteStore for MemoryStore {
    fn upload(
        &self,
        name: &str,
        blob: &mut dyn Read,
        len: u64,
        on_progress: TransferProgress<'_>,
    ) -> Result<RemoteId, RemoteError> {
        validate_name(name)?;
        self.check_online()?;

        let budget = self.faults().upload_byte_budget;
        let mut buffer = Vec::with_capacity(len as usize);
        let mut sent = 0u64;
        let mut cut = false;
        let copied = copy_with_progress(blob, &mut buffer, &mut |n: u64| {
            sent += n;
            if budget.is_some_and(|limit| sent > limit) {
                cut = true;
                return std::ops::ControlFlow::Break(());
            }
            on_progress(n)
        });

        let copied = match copied {
            Ok(copied) => copied,
            Err(RemoteError::Aborted) if cut => {
                return Err(RemoteError::Network("Connection reset during upload".to_string()))
            }
            Err(err) => return Err(err),
        };
        if copied != len {
            return Err(RemoteError::Network(format!(
                "Upload length mismatch: expected {} bytes, sent {}",
                len, copied
            )));
        }

        self.objects().insert(name.to_string(), buffer);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(RemoteId::new(name))
    }

    fn download(
        &self,
        id: &RemoteId,
        dest: &mut dyn Write,
        on_progress: TransferProgress<'_>,
    ) -> Result<u64, RemoteError> {
        self.check_online()?;
        let blob = self
            .get(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        copy_with_progress(&mut Cursor::new(blob), dest, on_progress)
    }

    fn delete(&self, id: &RemoteId) -> Result<(), RemoteError> {
        self.check_online()?;
        if self.faults().fail_deletes {
            return Err(RemoteError::Network("Delete rejected by remote store".to_string()));
        }
        match self.objects().remove(id.as_str()) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(id.to_string())),
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::ControlFlow;

    fn keep_going(_: u64) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    #[test]
    fn test_round_trip() {
        let store = MemoryStore::new();
        let blob = b"encrypted bytes".to_vec();
        let id = store
            .upload("x.kpk", &mut Cursor::new(&blob), blob.len() as u64, &mut keep_going)
            .unwrap();
        assert!(store.contains(&id));
        assert_eq!(store.upload_count(), 1);

        let mut out = Vec::new();
        store.download(&id, &mut out, &mut keep_going).unwrap();
        assert_eq!(out, blob);

        store.delete(&id).unwrap();
        assert_eq!(store.object_count(), 0);
    }

    #[test]
    fn test_offline() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = store
            .upload("x.kpk", &mut Cursor::new(b"abc"), 3, &mut keep_going)
            .unwrap_err();
        assert!(matches!(err, RemoteError::Network(_)));
        assert_eq!(store.object_count(), 0);
    }

    #[test]
    fn test_upload_cut_after_budget() {
        let store = MemoryStore::new();
        store.fail_uploads_after(Some(100_000));
        let blob = vec![0u8; 300_000];
        let err = store
            .upload("x.kpk", &mut Cursor::new(&blob), blob.len() as u64, &mut keep_going)
            .unwrap_err();
        assert!(matches!(err, RemoteError::Network(_)));
        assert_eq!(store.object_count(), 0);
    }

    #[test]
    fn test_delete_failures() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.delete(&RemoteId::new("missing")),
            Err(RemoteError::NotFound(_))
        ));

        store.put_raw(&RemoteId::new("y.kpk"), vec![1]);
        store.set_fail_deletes(true);
        assert!(matches!(
            store.delete(&RemoteId::new("y.kpk")),
            Err(RemoteError::Network(_))
        ));
        assert_eq!(store.object_count(), 1);
    }
}
