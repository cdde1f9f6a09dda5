//! SHA-256 plaintext integrity
//!
//! The digest is computed over raw plaintext only: on upload it is updated as
//! chunks leave the reader (before compression or encryption), on download the
//! finalized plaintext file is rehashed and hex-compared.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Incremental SHA-256 over plaintext bytes.
pub struct Checksum {
    hasher: Sha256,
}

impl Checksum {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self { hasher: Sha256::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Finalize to the lowercase hex digest stored in file metadata.
    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Hash a whole file on disk.
pub fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("opening {}: {e}", path.display()))?;
    let mut reader = std::io::BufReader::new(file);
    let mut checksum = Checksum::new();
    let mut buf = vec![0u8; crate::SEGMENT_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        checksum.update(&buf[..n]);
    }
    Ok(checksum.finalize_hex())
}

/// Rehash `path` and compare against the digest recorded at upload time.
pub fn verify_file(path: &Path, expected_hex: &str) -> anyhow::Result<()> {
    let got = sha256_file(path)?;
    if !got.eq_ignore_ascii_case(expected_hex) {
        anyhow::bail!(
            "checksum mismatch for {}: expected {expected_hex}, got {got}",
            path.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // SHA-256 of the single byte 0x00.
    const SHA256_NUL: &str = "6e340b9cffb37a989ca544e6bb780a2c78901d3fb33738768511a30617afa01d";

    #[test]
    fn known_digest() {
        let mut c = Checksum::new();
        c.update(b"\x00");
        assert_eq!(c.finalize_hex(), SHA256_NUL);
    }

    #[test]
    fn incremental_matches_oneshot() {
        let data: Vec<u8> = (0..200_000).map(|i| (i % 256) as u8).collect();
        let mut incremental = Checksum::new();
        for chunk in data.chunks(65_536) {
            incremental.update(chunk);
        }
        let mut oneshot = Checksum::new();
        oneshot.update(&data);
        assert_eq!(incremental.finalize_hex(), oneshot.finalize_hex());
    }

    #[test]
    fn file_verify_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data.bin");
        std::fs::write(&path, b"\x00").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), SHA256_NUL);
        verify_file(&path, SHA256_NUL).unwrap();
        verify_file(&path, &SHA256_NUL.to_uppercase()).unwrap();
        assert!(verify_file(&path, &"0".repeat(64)).is_err());
    }
}
