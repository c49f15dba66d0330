//! Remote store adapter
//!
//! The pipeline only needs three capabilities from off-device storage:
//! upload a blob under a name, download it back by id, and delete it.
//! Concrete providers implement [`RemoteStore`]; two ship with the crate:
//!
//! - [`DirectoryStore`]: objects as files under a directory (a mounted
//!   share, a synced folder)
//! - [`MemoryStore`]: in-process objects with failure injection

use std::fmt;
use std::io::{Read, Write};
use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod directory;
mod memory;

pub use directory::DirectoryStore;
pub use memory::MemoryStore;

/// Bytes moved per progress callback
pub const TRANSFER_CHUNK: usize = 64 * 1024;

/// Identifier of a blob in the remote store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failures reported by a remote store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Transfer or connectivity failure; the caller may retry
    #[error("Network error: {0}")]
    Network(String),

    /// No blob with this id
    #[error("Remote blob not found: {0}")]
    NotFound(String),

    /// The progress callback asked the transfer to stop
    #[error("Transfer aborted")]
    Aborted,
}

/// Progress callback for transfers: receives bytes moved since the last
/// call and may stop the transfer at the next chunk boundary
pub type TransferProgress<'a> = &'a mut dyn FnMut(u64) -> ControlFlow<()>;

/// Upload/download/delete capability required by the pipeline
///
/// Implementations must not leave a partially written object visible under
/// `name` when `upload` fails.
pub trait RemoteStore: Send + Sync {
    /// Store `len` bytes read from `blob` under `name`
    fn upload(
        &self,
        name: &str,
        blob: &mut dyn Read,
        len: u64,
        on_progress: TransferProgress<'_>,
    ) -> Result<RemoteId, RemoteError>;

    /// Stream the blob `id` into `dest`, returning the byte count
    fn download(
        &self,
        id: &RemoteId,
        dest: &mut dyn Write,
        on_progress: TransferProgress<'_>,
    ) -> Result<u64, RemoteError>;

    /// Remove the blob `id`
    fn delete(&self, id: &RemoteId) -> Result<(), RemoteError>;

    /// Provider name for display
    fn name(&self) -> &str;
}

/// Copy `src` to `dst` in transfer-sized chunks, reporting each one
pub(crate) fn copy_with_progress(
    src: &mut dyn Read,
    dst: &mut dyn Write,
    on_progress: TransferProgress<'_>,
) -> Result<u64, RemoteError> {
    let mut buf = vec![0u8; TRANSFER_CHUNK];
    let mut total = 0u64;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(RemoteError::Network(format!("Read failed: {}", e))),
        };
        dst.write_all(&buf[..n])
            .map_err(|e| RemoteError::Network(format!("Write failed: {}", e)))?;
        total += n as u64;
        if on_progress(n as u64).is_break() {
            return Err(RemoteError::Aborted);
        }
    }
    Ok(total)
}

/// Object names are single path components
pub(crate) fn validate_name(name: &str) -> Result<(), RemoteError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(|c: char| c == '/' || c == '\\');
    if valid {
        Ok(())
    } else {
        Err(RemoteError::Network(format!("Invalid object name: {:?}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_copy_with_progress_reports_all_bytes() {
        let data = vec![5u8; TRANSFER_CHUNK * 2 + 10];
        let mut out = Vec::new();
        let mut reported = 0u64;
        let copied = copy_with_progress(&mut Cursor::new(&data), &mut out, &mut |n: u64| {
            reported += n;
            ControlFlow::Continue(())
        })
        .unwrap();
        assert_eq!(copied, data.len() as u64);
        assert_eq!(reported, copied);
        assert_eq!(out, data);
    }

    #[test]
    fn test_copy_with_progress_abort() {
        let data = vec![5u8; TRANSFER_CHUNK * 3];
        let mut out = Vec::new();
        let result = copy_with_progress(&mut Cursor::new(&data), &mut out, &mut |_: u64| {
            ControlFlow::Break(())
        });
        assert_eq!(result, Err(RemoteError::Aborted));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("abc.kpk").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../x").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("a\\b").is_err());
    }
}
