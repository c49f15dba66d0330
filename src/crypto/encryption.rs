//! Chunked AES-256-GCM encryption for archive blobs
//!
//! Archives can be large, so the plaintext is sealed in fixed-size chunks
//! (the STREAM construction). Each chunk nonce is the 7-byte random prefix
//! from the header, a big-endian chunk counter and a final-chunk flag. The
//! header is bound to every chunk as associated data.
//!
//! ```text
//! header  = magic "KSAK" | version u8 | chunk_size u32 LE | nonce prefix [u8; 7]
//! chunk_i = AES-GCM(key, prefix || i (BE32) || last (u8), aad = header, plaintext_i)
//! ```
//!
//! Any bit flip, truncation, reordering or appended data fails
//! authentication, so nothing is ever handed to the decompressor unverified.

use std::io::{self, Cursor, Read, Write};
use std::ops::ControlFlow;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};

use crate::error::{KeepsakeError, KeepsakeResult};

use super::DerivedKey;

/// Magic bytes identifying a Keepsake archive
pub const MAGIC: &[u8; 4] = b"KSAK";

/// Current format version
pub const FORMAT_VERSION: u8 = 1;

/// Length of the serialized header
pub const HEADER_LEN: usize = 16;

/// AES-GCM authentication tag size
pub const TAG_LEN: usize = 16;

/// Default plaintext bytes per chunk (64 KiB)
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

/// Upper bound accepted when reading a header
pub const MAX_CHUNK_SIZE: u32 = 16 * 1024 * 1024;

const NONCE_PREFIX_LEN: usize = 7;

/// Per-chunk callback; `Break` stops the stream at the chunk boundary
pub type ChunkProgress<'a> = &'a mut dyn FnMut(u64) -> ControlFlow<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StreamHeader {
    chunk_size: u32,
    nonce_prefix: [u8; NONCE_PREFIX_LEN],
}

impl StreamHeader {
    fn generate(chunk_size: u32) -> Self {
        let mut nonce_prefix = [0u8; NONCE_PREFIX_LEN];
        OsRng.fill_bytes(&mut nonce_prefix);
        Self {
            chunk_size,
            nonce_prefix,
        }
    }

    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(MAGIC);
        out[4] = FORMAT_VERSION;
        out[5..9].copy_from_slice(&self.chunk_size.to_le_bytes());
        out[9..].copy_from_slice(&self.nonce_prefix);
        out
    }

    fn parse(bytes: &[u8; HEADER_LEN]) -> KeepsakeResult<Self> {
        if &bytes[..4] != MAGIC {
            return Err(KeepsakeError::Integrity(
                "Not a Keepsake archive (bad magic)".to_string(),
            ));
        }
        if bytes[4] != FORMAT_VERSION {
            return Err(KeepsakeError::Integrity(format!(
                "Unsupported archive version: {}",
                bytes[4]
            )));
        }

        let mut size = [0u8; 4];
        size.copy_from_slice(&bytes[5..9]);
        let chunk_size = u32::from_le_bytes(size);
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(KeepsakeError::Integrity(format!(
                "Invalid chunk size in header: {}",
                chunk_size
            )));
        }

        let mut nonce_prefix = [0u8; NONCE_PREFIX_LEN];
        nonce_prefix.copy_from_slice(&bytes[9..]);

        Ok(Self {
            chunk_size,
            nonce_prefix,
        })
    }

    fn nonce(&self, counter: u32, last: bool) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..NONCE_PREFIX_LEN].copy_from_slice(&self.nonce_prefix);
        nonce[NONCE_PREFIX_LEN..11].copy_from_slice(&counter.to_be_bytes());
        nonce[11] = u8::from(last);
        nonce
    }
}

fn new_cipher(key: &DerivedKey) -> KeepsakeResult<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| KeepsakeError::Encryption(format!("Failed to create cipher: {}", e)))
}

/// Fill `buf` from `reader`, stopping early only at end of input
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Encrypt everything from `reader` into `writer`
///
/// `on_chunk` is called with the plaintext length of each sealed chunk and
/// may stop the stream, which then fails with `Cancelled`. Returns the
/// total number of ciphertext bytes written.
pub fn encrypt_stream<R, W>(
    reader: &mut R,
    writer: &mut W,
    key: &DerivedKey,
    chunk_size: u32,
    on_chunk: ChunkProgress<'_>,
) -> KeepsakeResult<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(KeepsakeError::Encryption(format!("Invalid chunk size: {}", chunk_size)));
    }

    let cipher = new_cipher(key)?;
    let header = StreamHeader::generate(chunk_size);
    let header_bytes = header.to_bytes();
    let io_err = |e: io::Error| KeepsakeError::Io(format!("Encryption stream failed: {}", e));

    writer.write_all(&header_bytes).map_err(io_err)?;
    let mut written = HEADER_LEN as u64;

    let size = chunk_size as usize;
    let mut current = vec![0u8; size];
    let mut next = vec![0u8; size];
    let mut len = read_full(reader, &mut current).map_err(io_err)?;
    let mut counter: u32 = 0;

    loop {
        let mut next_len = 0;
        let last = if len < size {
            true
        } else {
            next_len = read_full(reader, &mut next).map_err(io_err)?;
            next_len == 0
        };

        let nonce = header.nonce(counter, last);
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &current[..len],
                    aad: &header_bytes,
                },
            )
            .map_err(|e| KeepsakeError::Encryption(format!("Encryption failed: {}", e)))?;

        writer.write_all(&sealed).map_err(io_err)?;
        written += sealed.len() as u64;
        if on_chunk(len as u64).is_break() {
            return Err(KeepsakeError::Cancelled);
        }

        if last {
            break;
        }

        std::mem::swap(&mut current, &mut next);
        len = next_len;
        counter = counter.checked_add(1).ok_or_else(|| {
            KeepsakeError::Encryption("Archive exceeds maximum chunk count".to_string())
        })?;
    }

    writer.flush().map_err(io_err)?;
    Ok(written)
}

/// Decrypt a stream produced by [`encrypt_stream`]
///
/// `on_chunk` is called with the ciphertext length of each verified chunk.
/// Any authentication failure, truncation or trailing data yields
/// [`KeepsakeError::Integrity`]. Returns the number of plaintext bytes
/// written.
pub fn decrypt_stream<R, W>(
    reader: &mut R,
    writer: &mut W,
    key: &DerivedKey,
    on_chunk: ChunkProgress<'_>,
) -> KeepsakeResult<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let cipher = new_cipher(key)?;
    let io_err = |e: io::Error| KeepsakeError::Io(format!("Decryption stream failed: {}", e));

    let mut header_bytes = [0u8; HEADER_LEN];
    if read_full(reader, &mut header_bytes).map_err(io_err)? < HEADER_LEN {
        return Err(KeepsakeError::Integrity(
            "Archive is truncated (no header)".to_string(),
        ));
    }
    let header = StreamHeader::parse(&header_bytes)?;

    let frame = header.chunk_size as usize + TAG_LEN;
    let mut current = vec![0u8; frame];
    let mut next = vec![0u8; frame];
    let mut len = read_full(reader, &mut current).map_err(io_err)?;
    let mut counter: u32 = 0;
    let mut written = 0u64;

    loop {
        if len < TAG_LEN {
            return Err(KeepsakeError::Integrity(format!(
                "Archive is truncated at chunk {}",
                counter
            )));
        }

        let mut next_len = 0;
        let last = if len < frame {
            true
        } else {
            next_len = read_full(reader, &mut next).map_err(io_err)?;
            next_len == 0
        };

        let nonce = header.nonce(counter, last);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &current[..len],
                    aad: &header_bytes,
                },
            )
            .map_err(|_| {
                KeepsakeError::Integrity(format!(
                    "Chunk {} failed authentication: wrong key or corrupted archive",
                    counter
                ))
            })?;

        writer.write_all(&plaintext).map_err(io_err)?;
        written += plaintext.len() as u64;
        if on_chunk(len as u64).is_break() {
            return Err(KeepsakeError::Cancelled);
        }

        if last {
            break;
        }

        std::mem::swap(&mut current, &mut next);
        len = next_len;
        counter = counter.checked_add(1).ok_or_else(|| {
            KeepsakeError::Integrity("Archive exceeds maximum chunk count".to_string())
        })?;
    }

    let mut trailing = [0u8; 1];
    if read_full(reader, &mut trailing).map_err(io_err)? != 0 {
        return Err(KeepsakeError::Integrity(
            "Unexpected data after final chunk".to_string(),
        ));
    }

    writer.flush().map_err(io_err)?;
    Ok(written)
}

/// Encrypt an in-memory blob
pub fn encrypt(plaintext: &[u8], key: &DerivedKey) -> KeepsakeResult<Vec<u8>> {
    let mut out = Vec::with_capacity(plaintext.len() + HEADER_LEN + TAG_LEN);
    encrypt_stream(
        &mut Cursor::new(plaintext),
        &mut out,
        key,
        DEFAULT_CHUNK_SIZE,
        &mut |_: u64| ControlFlow::Continue(()),
    )?;
    Ok(out)
}

/// Decrypt an in-memory blob, failing with `Integrity` on any tampering
pub fn decrypt(ciphertext: &[u8], key: &DerivedKey) -> KeepsakeResult<Vec<u8>> {
    let mut out = Vec::with_capacity(ciphertext.len());
    decrypt_stream(
        &mut Cursor::new(ciphertext),
        &mut out,
        key,
        &mut |_: u64| ControlFlow::Continue(()),
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;

    fn test_key() -> DerivedKey {
        DerivedKey::from_bytes([0x42; KEY_LEN])
    }

    fn encrypt_chunked(plaintext: &[u8], chunk_size: u32) -> Vec<u8> {
        let mut out = Vec::new();
        encrypt_stream(
            &mut Cursor::new(plaintext),
            &mut out,
            &test_key(),
            chunk_size,
            &mut |_: u64| ControlFlow::Continue(()),
        )
        .unwrap();
        out
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = test_key();
        let plaintext = b"structured records and media";

        let encrypted = encrypt(plaintext, &key).unwrap();
        let decrypted = decrypt(&encrypted, &key).unwrap();

        assert_eq!(plaintext, decrypted.as_slice());
        assert_eq!(&encrypted[..4], MAGIC);
    }

    #[test]
    fn test_multi_chunk_round_trip() {
        let key = test_key();
        let plaintext: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();

        // 10_000 / 64 leaves a partial final chunk
        let encrypted = encrypt_chunked(&plaintext, 64);
        assert_eq!(decrypt(&encrypted, &key).unwrap(), plaintext);

        // Exact multiple of the chunk size: the last chunk is full
        let encrypted = encrypt_chunked(&plaintext, 100);
        assert_eq!(decrypt(&encrypted, &key).unwrap(), plaintext);
    }

    #[test]
    fn test_empty_plaintext() {
        let key = test_key();
        let encrypted = encrypt(b"", &key).unwrap();
        assert_eq!(encrypted.len(), HEADER_LEN + TAG_LEN);
        assert!(decrypt(&encrypted, &key).unwrap().is_empty());
    }

    #[test]
    fn test_different_nonces() {
        let key = test_key();
        let encrypted1 = encrypt(b"same input", &key).unwrap();
        let encrypted2 = encrypt(b"same input", &key).unwrap();
        assert_ne!(encrypted1, encrypted2);
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = encrypt(b"secret", &test_key()).unwrap();
        let other = DerivedKey::from_bytes([0x24; KEY_LEN]);

        let err = decrypt(&encrypted, &other).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_every_single_bit_flip_is_rejected() {
        let key = test_key();
        let plaintext: Vec<u8> = (0..200).map(|i| i as u8).collect();
        let encrypted = encrypt_chunked(&plaintext, 64);

        for byte in 0..encrypted.len() {
            for bit in 0..8 {
                let mut tampered = encrypted.clone();
                tampered[byte] ^= 1 << bit;
                let err = decrypt(&tampered, &key).unwrap_err();
                assert!(err.is_integrity(), "flip at byte {} bit {}: {}", byte, bit, err);
            }
        }
    }

    #[test]
    fn test_truncation_rejected() {
        let key = test_key();
        let plaintext = vec![7u8; 300];
        let encrypted = encrypt_chunked(&plaintext, 64);

        // Dropping whole trailing chunks must not look like a shorter archive
        let frame = 64 + TAG_LEN;
        for cut in [HEADER_LEN + frame, HEADER_LEN + 2 * frame, encrypted.len() - 1, 3] {
            let err = decrypt(&encrypted[..cut], &key).unwrap_err();
            assert!(err.is_integrity(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_appended_data_rejected() {
        let key = test_key();
        let mut encrypted = encrypt_chunked(&[1u8; 128], 64);
        encrypted.extend_from_slice(&[0u8; 5]);
        assert!(decrypt(&encrypted, &key).unwrap_err().is_integrity());
    }

    #[test]
    fn test_swapped_chunks_rejected() {
        let key = test_key();
        let plaintext: Vec<u8> = (0..128).map(|i| i as u8).collect();
        let mut encrypted = encrypt_chunked(&plaintext, 32);
        let frame = 32 + TAG_LEN;
        let (a, b) = (HEADER_LEN, HEADER_LEN + frame);
        let first: Vec<u8> = encrypted[a..a + frame].to_vec();
        let second: Vec<u8> = encrypted[b..b + frame].to_vec();
        encrypted[a..a + frame].copy_from_slice(&second);
        encrypted[b..b + frame].copy_from_slice(&first);
        assert!(decrypt(&encrypted, &key).unwrap_err().is_integrity());
    }

    #[test]
    fn test_callback_can_stop_stream() {
        let mut out = Vec::new();
        let mut seen = 0u64;
        let result = encrypt_stream(
            &mut Cursor::new(vec![0u8; 1000]),
            &mut out,
            &test_key(),
            100,
            &mut |n: u64| {
                seen += n;
                if seen >= 300 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
        );
        assert!(matches!(result, Err(KeepsakeError::Cancelled)));
        assert_eq!(seen, 300);
    }

    #[test]
    fn test_rejects_invalid_chunk_size() {
        let mut out = Vec::new();
        let result = encrypt_stream(
            &mut Cursor::new(b"abc"),
            &mut out,
            &test_key(),
            0,
            &mut |_: u64| ControlFlow::Continue(()),
        );
        assert!(matches!(result, Err(KeepsakeError::Encryption(_))));
    }
}
