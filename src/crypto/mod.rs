//! Cryptographic functions for Keepsake
//!
//! Provides chunked AES-256-GCM archive encryption with Argon2id key
//! derivation from a device-held secret.

pub mod encryption;
pub mod key_derivation;
pub mod key_provider;
pub mod secure_memory;

pub use encryption::{
    decrypt, decrypt_stream, encrypt, encrypt_stream, ChunkProgress, DEFAULT_CHUNK_SIZE, HEADER_LEN,
    TAG_LEN,
};
pub use key_derivation::{derive_key, DerivedKey, KeyDerivationParams, KEY_LEN};
pub use key_provider::{DeviceKeyProvider, KeyProvider, StaticKeyProvider};
pub use secure_memory::SecureBytes;
