//! Single-operation admission
//!
//! Create, restore and delete all mutate the catalog and staging area, so
//! at most one may run at a time per keepsake directory. The guard is a
//! lock file created exclusively under `backups/`; every service over the
//! same directory, in this process or another, contends for the same file.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use tracing::{debug, warn};

use super::error::BackupError;

/// Lock file admitting one operation at a time
#[derive(Debug, Clone)]
pub struct OperationGuard {
    lock_path: PathBuf,
}

impl OperationGuard {
    pub fn new(lock_path: PathBuf) -> Self {
        Self { lock_path }
    }

    /// Take the guard, failing fast with `Concurrency` if it is held
    pub fn try_acquire(&self) -> Result<OperationPermit, BackupError> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BackupError::Preparation(format!("Failed to create lock directory: {}", e))
            })?;
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %self.lock_path.display(), "Operation lock already held");
                return Err(BackupError::Concurrency);
            }
            Err(e) => {
                return Err(BackupError::Preparation(format!(
                    "Failed to create operation lock {}: {}",
                    self.lock_path.display(),
                    e
                )))
            }
        };

        // Owner pid
        let _ = writeln!(file, "{}", std::process::id());

        Ok(OperationPermit {
            lock_path: self.lock_path.clone(),
        })
    }

    /// Whether an operation currently holds the guard
    pub fn is_busy(&self) -> bool {
        self.lock_path.exists()
    }
}

/// Held for the duration of one operation; releases the guard on drop
#[must_use = "the guard is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct OperationPermit {
    lock_path: PathBuf,
}

impl Drop for OperationPermit {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!(path = %self.lock_path.display(), error = %e, "Failed to release operation lock");
        }
    }
}
