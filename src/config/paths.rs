//! Path management for Keepsake
//!
//! Provides XDG-compliant path resolution for configuration, live data,
//! backups and the default remote store.
//!
//! ## Path Resolution Order
//!
//! 1. `KEEPSAKE_DATA_DIR` environment variable (if set)
//! 2. Unix (Linux/macOS): `$XDG_CONFIG_HOME/keepsake` or `~/.config/keepsake`
//! 3. Windows: `%APPDATA%\keepsake`

use std::path::PathBuf;

use crate::error::KeepsakeError;

/// Name of the live structured-records directory (also its archive root)
pub const DATA_DIR_NAME: &str = "data";

/// Name of the live media directory (also its archive root)
pub const MEDIA_DIR_NAME: &str = "media";

/// Extension used for encrypted archive blobs
pub const ARCHIVE_EXTENSION: &str = "kpk";

/// Manages all paths used by Keepsake
#[derive(Debug, Clone)]
pub struct KeepsakePaths {
    /// Base directory for all Keepsake data
    base_dir: PathBuf,
}

impl KeepsakePaths {
    /// Create a new KeepsakePaths instance
    ///
    /// Path resolution:
    /// 1. `KEEPSAKE_DATA_DIR` env var (explicit override)
    /// 2. Unix: `$XDG_CONFIG_HOME/keepsake` or `~/.config/keepsake`
    /// 3. Windows: `%APPDATA%\keepsake`
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, KeepsakeError> {
        let base_dir = if let Ok(custom) = std::env::var("KEEPSAKE_DATA_DIR") {
            PathBuf::from(custom)
        } else {
            resolve_default_path()?
        };

        Ok(Self { base_dir })
    }

    /// Create KeepsakePaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.config/keepsake/ or equivalent)
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Live structured records (~/.config/keepsake/data/)
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join(DATA_DIR_NAME)
    }

    /// Live media files (~/.config/keepsake/media/)
    pub fn media_dir(&self) -> PathBuf {
        self.base_dir.join(MEDIA_DIR_NAME)
    }

    /// Get the backup directory (~/.config/keepsake/backups/)
    pub fn backup_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Path of the persisted backup catalog
    pub fn catalog_file(&self) -> PathBuf {
        self.backup_dir().join("catalog.json")
    }

    /// Lock file held while a create, restore or delete runs
    pub fn lock_file(&self) -> PathBuf {
        self.backup_dir().join(".lock")
    }

    /// Path of the encrypted archive for a backup
    pub fn archive_file(&self, stem: &str) -> PathBuf {
        self.backup_dir()
            .join(format!("{}.{}", stem, ARCHIVE_EXTENSION))
    }

    /// Root of the default directory-backed remote store
    pub fn remote_dir(&self) -> PathBuf {
        self.base_dir.join("remote")
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the path to the device secret used for key derivation
    pub fn device_key_file(&self) -> PathBuf {
        self.base_dir.join("device.key")
    }

    /// Get the path to the audit log
    pub fn audit_log(&self) -> PathBuf {
        self.base_dir.join("audit.log")
    }

    /// Ensure all required directories exist
    ///
    /// Creates:
    /// - Base directory (~/.config/keepsake/)
    /// - Data directory (~/.config/keepsake/data/)
    /// - Media directory (~/.config/keepsake/media/)
    /// - Backup directory (~/.config/keepsake/backups/)
    pub fn ensure_directories(&self) -> Result<(), KeepsakeError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| KeepsakeError::Io(format!("Failed to create base directory: {}", e)))?;

        std::fs::create_dir_all(self.data_dir())
            .map_err(|e| KeepsakeError::Io(format!("Failed to create data directory: {}", e)))?;

        std::fs::create_dir_all(self.media_dir())
            .map_err(|e| KeepsakeError::Io(format!("Failed to create media directory: {}", e)))?;

        std::fs::create_dir_all(self.backup_dir())
            .map_err(|e| KeepsakeError::Io(format!("Failed to create backup directory: {}", e)))?;

        Ok(())
    }

    /// Check if Keepsake has been initialized (config file exists)
    pub fn is_initialized(&self) -> bool {
        self.settings_file().exists()
    }
}

/// Resolve the default data directory path based on platform
#[cfg(not(windows))]
fn resolve_default_path() -> Result<PathBuf, KeepsakeError> {
    // Unix (Linux/macOS): Use XDG_CONFIG_HOME if set, otherwise ~/.config
    let config_base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(xdg) => PathBuf::from(xdg),
        Err(_) => {
            let home = std::env::var("HOME").map_err(|_| {
                KeepsakeError::Config("HOME environment variable not set".into())
            })?;
            PathBuf::from(home).join(".config")
        }
    };
    Ok(config_base.join("keepsake"))
}

/// Resolve the default data directory path based on platform
#[cfg(windows)]
fn resolve_default_path() -> Result<PathBuf, KeepsakeError> {
    let appdata = std::env::var("APPDATA")
        .map_err(|_| KeepsakeError::Config("Could not determine APPDATA directory".into()))?;
    Ok(PathBuf::from(appdata).join("keepsake"))
}
