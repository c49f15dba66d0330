//! User settings for Keepsake
//!
//! Manages key derivation parameters, archive tuning and retention.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::paths::KeepsakePaths;
use crate::crypto::key_derivation::KeyDerivationParams;
use crate::crypto::DEFAULT_CHUNK_SIZE;
use crate::error::KeepsakeError;
use crate::storage::file_io::write_json_atomic;

/// Backup pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Keep the on-device encrypted archive after a successful upload
    #[serde(default = "default_keep_local")]
    pub keep_local_archive: bool,

    /// Plaintext bytes per encrypted chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Deflate level (0 stores entries uncompressed)
    #[serde(default = "default_compression_level")]
    pub compression_level: i64,

    /// Number of backups `prune` keeps
    #[serde(default = "default_retention_count")]
    pub retention_count: u32,
}

fn default_keep_local() -> bool {
    true
}

fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

fn default_compression_level() -> i64 {
    6
}

fn default_retention_count() -> u32 {
    10
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            keep_local_archive: default_keep_local(),
            chunk_size: default_chunk_size(),
            compression_level: default_compression_level(),
            retention_count: default_retention_count(),
        }
    }
}

/// Remote store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Directory used by the directory-backed remote store.
    /// Falls back to `<base>/remote` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl RemoteSettings {
    /// Resolve the remote directory against the configured paths
    pub fn resolve_directory(&self, paths: &KeepsakePaths) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| paths.remote_dir())
    }
}

/// Settings for Keepsake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Key derivation parameters for the archive key
    #[serde(default)]
    pub key_params: KeyDerivationParams,

    /// Backup pipeline behavior
    #[serde(default)]
    pub backup: BackupSettings,

    /// Remote store configuration
    #[serde(default)]
    pub remote: RemoteSettings,
}

fn default_schema_version() -> u32 {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            key_params: KeyDerivationParams::new(),
            backup: BackupSettings::default(),
            remote: RemoteSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or create default settings if file doesn't exist
    pub fn load_or_create(paths: &KeepsakePaths) -> Result<Self, KeepsakeError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path).map_err(|e| {
                KeepsakeError::Io(format!("Failed to read settings file: {}", e))
            })?;

            let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
                KeepsakeError::Config(format!("Failed to parse settings file: {}", e))
            })?;

            Ok(settings)
        } else {
            // Don't save yet - let caller decide when to persist
            Ok(Settings::default())
        }
    }

    /// Save settings to disk
    pub fn save(&self, paths: &KeepsakePaths) -> Result<(), KeepsakeError> {
        paths.ensure_directories()?;
        write_json_atomic(paths.settings_file(), self)
    }
}
