//! Key providers for the archive cipher
//!
//! The pipeline never sees where key material comes from. Platforms with a
//! secure key store implement [`KeyProvider`] themselves; the default
//! [`DeviceKeyProvider`] keeps a random secret in a file readable only by
//! the owner and stretches it with Argon2id.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;
use base64::{engine::general_purpose::STANDARD, Engine};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{KeepsakeError, KeepsakeResult};

use super::key_derivation::{derive_key, DerivedKey, KeyDerivationParams, KEY_LEN};
use super::secure_memory::SecureBytes;

const DEVICE_SECRET_LEN: usize = 32;

/// Source of the key used to seal and open archives
pub trait KeyProvider: Send + Sync {
    /// Produce the archive key, provisioning key material if none exists yet
    fn archive_key(&self) -> KeepsakeResult<DerivedKey>;

    /// Produce the archive key from key material that must already exist
    ///
    /// Used when opening archives: a key minted now could never open them.
    /// Providers without a provisioning step need not override this.
    fn existing_archive_key(&self) -> KeepsakeResult<DerivedKey> {
        self.archive_key()
    }
}

/// Derives the archive key from a device-held secret file
#[derive(Debug, Clone)]
pub struct DeviceKeyProvider {
    secret_path: PathBuf,
    params: KeyDerivationParams,
}

impl DeviceKeyProvider {
    pub fn new(secret_path: PathBuf, params: KeyDerivationParams) -> Self {
        Self {
            secret_path,
            params,
        }
    }

    /// Path of the secret file
    pub fn secret_path(&self) -> &Path {
        &self.secret_path
    }

    /// Load the device secret, generating it on first use
    pub fn load_or_create_secret(&self) -> KeepsakeResult<SecureBytes> {
        if self.secret_path.exists() {
            return self.load_secret();
        }

        let mut raw = [0u8; DEVICE_SECRET_LEN];
        OsRng.fill_bytes(&mut raw);
        let secret = SecureBytes::new(raw.to_vec());
        raw.zeroize();

        if let Some(parent) = self.secret_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                KeepsakeError::Io(format!("Failed to create key directory: {}", e))
            })?;
        }

        let mut encoded = STANDARD.encode(secret.as_bytes());
        let result = write_private_file(&self.secret_path, encoded.as_bytes());
        encoded.zeroize();
        result?;

        tracing::info!(path = %self.secret_path.display(), "Generated new device secret");
        Ok(secret)
    }

    fn load_secret(&self) -> KeepsakeResult<SecureBytes> {
        let mut encoded = fs::read_to_string(&self.secret_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => KeepsakeError::Config(format!(
                "Device key missing: {}",
                self.secret_path.display()
            )),
            _ => KeepsakeError::Io(format!("Failed to read device secret: {}", e)),
        })?;
        let decoded = STANDARD.decode(encoded.trim());
        encoded.zeroize();

        let bytes = decoded
            .map_err(|e| KeepsakeError::Config(format!("Device secret is corrupted: {}", e)))?;
        if bytes.len() != DEVICE_SECRET_LEN {
            return Err(KeepsakeError::Config(format!(
                "Device secret has wrong length: expected {}, got {}",
                DEVICE_SECRET_LEN,
                bytes.len()
            )));
        }
        Ok(SecureBytes::new(bytes))
    }
}

impl KeyProvider for DeviceKeyProvider {
    fn archive_key(&self) -> KeepsakeResult<DerivedKey> {
        let secret = self.load_or_create_secret()?;
        derive_key(secret.as_bytes(), &self.params)
    }

    fn existing_archive_key(&self) -> KeepsakeResult<DerivedKey> {
        let secret = self.load_secret()?;
        derive_key(secret.as_bytes(), &self.params)
    }
}

/// A fixed key handed over by a platform key store
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct StaticKeyProvider {
    key: [u8; KEY_LEN],
}

impl StaticKeyProvider {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn archive_key(&self) -> KeepsakeResult<DerivedKey> {
        Ok(DerivedKey::from_bytes(self.key))
    }
}

#[cfg(unix)]
fn write_private_file(path: &Path, contents: &[u8]) -> KeepsakeResult<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| KeepsakeError::Io(format!("Failed to create device secret: {}", e)))?;
    file.write_all(contents)
        .and_then(|_| file.sync_all())
        .map_err(|e| KeepsakeError::Io(format!("Failed to write device secret: {}", e)))
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, contents: &[u8]) -> KeepsakeResult<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| KeepsakeError::Io(format!("Failed to create device secret: {}", e)))?;
    file.write_all(contents)
        .and_then(|_| file.sync_all())
        .map_err(|e| KeepsakeError::Io(format!("Failed to write device secret: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_derivation::fast_params;
    use tempfile::TempDir;

    #[test]
    fn test_secret_generated_once() {
        let temp = TempDir::new().unwrap();
        let provider = DeviceKeyProvider::new(temp.path().join("device.key"), fast_params());

        let key1 = provider.archive_key().unwrap();
        assert!(provider.secret_path().exists());
        let key2 = provider.archive_key().unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let provider = DeviceKeyProvider::new(temp.path().join("device.key"), fast_params());
        provider.load_or_create_secret().unwrap();

        let mode = fs::metadata(provider.secret_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_corrupted_secret_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("device.key");
        fs::write(&path, "not base64 !!").unwrap();

        let provider = DeviceKeyProvider::new(path, fast_params());
        assert!(matches!(
            provider.archive_key(),
            Err(KeepsakeError::Config(_))
        ));
    }

    #[test]
    fn test_existing_key_requires_secret_file() {
        let temp = TempDir::new().unwrap();
        let provider = DeviceKeyProvider::new(temp.path().join("device.key"), fast_params());

        match provider.existing_archive_key() {
            Err(KeepsakeError::Config(msg)) => assert!(msg.contains("Device key missing")),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
        assert!(!provider.secret_path().exists());

        let created = provider.archive_key().unwrap();
        let loaded = provider.existing_archive_key().unwrap();
        assert_eq!(created.as_bytes(), loaded.as_bytes());
    }

    #[test]
    fn test_static_provider() {
        let provider = StaticKeyProvider::new([3u8; KEY_LEN]);
        assert_eq!(provider.archive_key().unwrap().as_bytes(), &[3u8; KEY_LEN]);
        assert_eq!(
            provider.existing_archive_key().unwrap().as_bytes(),
            &[3u8; KEY_LEN]
        );
    }
}
