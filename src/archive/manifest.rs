//! Archive manifest
//!
//! Every archive carries a `manifest.json` entry listing each packed file
//! with its size and SHA-256 digest, so a restore can prove the archive is
//! structurally complete before touching live data.

use std::io::{self, Read, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Name of the manifest entry inside the archive
pub const MANIFEST_NAME: &str = "manifest.json";

/// Current manifest format version
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

const COPY_BUFFER: usize = 64 * 1024;

/// One packed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Relative `/`-separated path, rooted at `data/` or `media/`
    pub path: String,
    pub size: u64,
    /// Lowercase hex SHA-256 of the file contents
    pub sha256: String,
}

/// Table of contents written into every archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub includes_media: bool,
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(created_at: DateTime<Utc>, includes_media: bool, files: Vec<ManifestEntry>) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            created_at,
            includes_media,
            files,
        }
    }

    pub fn file_count(&self) -> u64 {
        self.files.len() as u64
    }

    /// Sum of all file sizes
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Copy `reader` into `writer`, returning the byte count and hex SHA-256
pub(crate) fn copy_hashed<R, W>(reader: &mut R, writer: &mut W) -> io::Result<(u64, String)>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok((total, format!("{:x}", hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_copy_hashed_known_digest() {
        let mut out = Vec::new();
        let (len, digest) = copy_hashed(&mut Cursor::new(b"abc"), &mut out).unwrap();
        assert_eq!(len, 3);
        assert_eq!(out, b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_manifest_json() {
        let manifest = Manifest::new(
            Utc::now(),
            true,
            vec![
                ManifestEntry {
                    path: "data/a.json".into(),
                    size: 10,
                    sha256: "00".into(),
                },
                ManifestEntry {
                    path: "media/b.jpg".into(),
                    size: 32,
                    sha256: "11".into(),
                },
            ],
        );
        assert_eq!(manifest.file_count(), 2);
        assert_eq!(manifest.total_size(), 42);

        let json = manifest.to_json().unwrap();
        let text = String::from_utf8(json.clone()).unwrap();
        assert!(text.contains("\"format_version\": 1"));
        assert_eq!(Manifest::from_json(&json).unwrap(), manifest);
    }
}
