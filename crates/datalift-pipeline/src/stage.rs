//! Upload staging and download finalization
//!
//! Staging runs as a synchronous `std::io::Write` stack so the hash, the zstd
//! encoder and the segment cipher interleave chunk by chunk without buffering
//! the file: plaintext chunks are hashed as they leave the reader, then flow
//! through zstd (unless the source already carries a compressed-format magic)
//! and into the AEAD (sensitive projects only). Orchestrators run these
//! functions under `spawn_blocking`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use datalift_crypto::{
    decrypt_file, derive_upload_key, Checksum, FilePublicKey, ProjectPublicKey, Salt,
    SegmentEncryptor, SharedKey,
};

use crate::chunker::ChunkReader;
use crate::compression::{zstd_copy_decode, zstd_decode_writer, zstd_writer};

/// Everything staging learns about a file, destined for the registration call.
#[derive(Debug)]
pub struct StagedUpload {
    /// Lowercase hex SHA-256 of the raw plaintext.
    pub checksum: String,
    /// Raw plaintext bytes read.
    pub size_raw: u64,
    /// Bytes of the staging artifact on disk.
    pub size_staged: u64,
    /// Ephemeral public component + salt; `None` for non-sensitive projects.
    pub key_material: Option<(FilePublicKey, Salt)>,
}

/// Pump every chunk of `src` into `sink`, hashing the raw bytes on the way.
fn pump<W: Write>(src: &Path, sink: &mut W, checksum: &mut Checksum) -> anyhow::Result<u64> {
    let mut reader = ChunkReader::open(src)?;
    let mut raw = 0u64;
    while let Some(chunk) = reader.next_chunk()? {
        checksum.update(chunk);
        sink.write_all(chunk)?;
        raw += chunk.len() as u64;
    }
    Ok(raw)
}

/// Stage one file for upload.
///
/// - `project_public = Some(..)` (sensitive project): output is the encrypted
///   segment frame over the zstd stream (or over the raw bytes when
///   `compress` is false).
/// - `project_public = None` (non-sensitive): output is the zstd stream or a
///   plain copy.
///
/// The plaintext SHA-256 always covers the original bytes verbatim.
pub fn stage_upload(
    src: &Path,
    dst: &Path,
    project_public: Option<&ProjectPublicKey>,
    compress: bool,
) -> anyhow::Result<StagedUpload> {
    let out = BufWriter::new(
        File::create(dst).map_err(|e| anyhow::anyhow!("creating {}: {e}", dst.display()))?,
    );
    let mut checksum = Checksum::new();

    let (size_raw, key_material) = match (project_public, compress) {
        (Some(public), true) => {
            let (key, file_public, salt) = derive_upload_key(public)?;
            let cipher = SegmentEncryptor::new(out, &key)?;
            let mut encoder = zstd_writer(cipher)?;
            let raw = pump(src, &mut encoder, &mut checksum)?;
            let cipher = encoder.finish()?;
            cipher.finish()?;
            (raw, Some((file_public, salt)))
        }
        (Some(public), false) => {
            let (key, file_public, salt) = derive_upload_key(public)?;
            let mut cipher = SegmentEncryptor::new(out, &key)?;
            let raw = pump(src, &mut cipher, &mut checksum)?;
            cipher.finish()?;
            (raw, Some((file_public, salt)))
        }
        (None, true) => {
            let mut encoder = zstd_writer(out)?;
            let raw = pump(src, &mut encoder, &mut checksum)?;
            encoder.finish()?.flush()?;
            (raw, None)
        }
        (None, false) => {
            let mut out = out;
            let raw = pump(src, &mut out, &mut checksum)?;
            out.flush()?;
            (raw, None)
        }
    };

    let size_staged = std::fs::metadata(dst)?.len();
    tracing::debug!(
        src = %src.display(),
        raw = size_raw,
        staged = size_staged,
        encrypted = key_material.is_some(),
        compressed = compress,
        "staged"
    );

    Ok(StagedUpload {
        checksum: checksum.finalize_hex(),
        size_raw,
        size_staged,
        key_material,
    })
}

/// Turn a fetched staging artifact into the final plaintext file.
///
/// - `key = Some(..)`: the artifact is an encrypted segment frame; decrypted
///   output streams through the zstd decoder when `compressed`, else straight
///   to the destination.
/// - `key = None` (non-sensitive project): the artifact is the zstd stream or
///   the plaintext itself.
///
/// Returns the plaintext byte count. On error the partially written
/// destination is removed.
pub fn finalize_download(
    staging: &Path,
    dst: &Path,
    key: Option<&SharedKey>,
    compressed: bool,
) -> anyhow::Result<u64> {
    let result = finalize_inner(staging, dst, key, compressed);
    if result.is_err() {
        // Never leave a half-written or unauthenticated destination behind.
        let _ = std::fs::remove_file(dst);
    }
    result
}

fn finalize_inner(
    staging: &Path,
    dst: &Path,
    key: Option<&SharedKey>,
    compressed: bool,
) -> anyhow::Result<u64> {
    let out = BufWriter::new(
        File::create(dst).map_err(|e| anyhow::anyhow!("creating {}: {e}", dst.display()))?,
    );

    match (key, compressed) {
        (Some(key), true) => {
            let mut decoder = zstd_decode_writer(out)?;
            decrypt_file(staging, key, &mut decoder)?;
            decoder.flush()?;
            let written = decoder.into_inner().into_inner().map_err(|e| e.into_error())?;
            Ok(written.metadata()?.len())
        }
        (Some(key), false) => {
            let plain = decrypt_file(staging, key, out)?;
            Ok(plain)
        }
        (None, true) => {
            let src = File::open(staging)
                .map_err(|e| anyhow::anyhow!("opening {}: {e}", staging.display()))?;
            zstd_copy_decode(std::io::BufReader::new(src), out)?;
            Ok(std::fs::metadata(dst)?.len())
        }
        (None, false) => {
            let mut src = File::open(staging)
                .map_err(|e| anyhow::anyhow!("opening {}: {e}", staging.display()))?;
            let mut out = out;
            let n = std::io::copy(&mut src, &mut out)?;
            out.flush()?;
            Ok(n)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datalift_crypto::{derive_download_key, sha256_file, ProjectPrivateKey, SEGMENT_SIZE};
    use tempfile::TempDir;
    use x25519_dalek::{PublicKey, StaticSecret};

    fn project_pair() -> (ProjectPrivateKey, ProjectPublicKey) {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        (
            ProjectPrivateKey::from_hex(&hex::encode(secret.to_bytes())).unwrap(),
            ProjectPublicKey::from_hex(&hex::encode(public.to_bytes())).unwrap(),
        )
    }

    fn roundtrip(content: &[u8], compress: bool) -> (Vec<u8>, StagedUpload) {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.bin");
        let staged = tmp.path().join("src.bin.ccp");
        let dst = tmp.path().join("out.bin");
        std::fs::write(&src, content).unwrap();

        let (private, public) = project_pair();
        let info = stage_upload(&src, &staged, Some(&public), compress).unwrap();

        let (file_public, salt) = info.key_material.as_ref().unwrap();
        let key = derive_download_key(&private, file_public, salt).unwrap();
        finalize_download(&staged, &dst, Some(&key), compress).unwrap();

        (std::fs::read(&dst).unwrap(), info)
    }

    #[test]
    fn encrypted_compressed_roundtrip() {
        let content: Vec<u8> = (0..(10 * SEGMENT_SIZE + 17)).map(|i| (i % 97) as u8).collect();
        let (out, info) = roundtrip(&content, true);
        assert_eq!(out, content);
        assert_eq!(info.size_raw, content.len() as u64);
        // Repetitive input must actually shrink through zstd.
        assert!(info.size_staged < content.len() as u64);
    }

    #[test]
    fn encrypted_passthrough_roundtrip() {
        let content = vec![0x61u8; SEGMENT_SIZE];
        let (out, info) = roundtrip(&content, false);
        assert_eq!(out, content);
        // One full segment: iv0 + (seg + tag) + iv_last.
        assert_eq!(info.size_staged, 12 + (SEGMENT_SIZE as u64 + 16) + 12);
    }

    #[test]
    fn single_nul_byte_artifact_and_checksum() {
        let (out, info) = roundtrip(b"\x00", false);
        assert_eq!(out, b"\x00");
        assert_eq!(info.size_staged, 41);
        assert_eq!(
            info.checksum,
            "6e340b9cffb37a989ca544e6bb780a2c78901d3fb33738768511a30617afa01d"
        );
    }

    #[test]
    fn checksum_covers_raw_bytes_even_when_compressing() {
        let content = b"\x1f\x8bnot really gzip but carries the magic".to_vec();
        let (out, info) = roundtrip(&content, false);
        assert_eq!(out, content);

        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("raw");
        std::fs::write(&p, &content).unwrap();
        assert_eq!(info.checksum, sha256_file(&p).unwrap());
    }

    #[test]
    fn non_sensitive_compressed_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.txt");
        let staged = tmp.path().join("src.txt.zst.ccp");
        let dst = tmp.path().join("out.txt");
        let content = vec![b'a'; 200_000];
        std::fs::write(&src, &content).unwrap();

        let info = stage_upload(&src, &staged, None, true).unwrap();
        assert!(info.key_material.is_none());
        assert_eq!(
            crate::compression::detect_compressed(&staged).unwrap(),
            Some("zstd")
        );

        let n = finalize_download(&staged, &dst, None, true).unwrap();
        assert_eq!(n, content.len() as u64);
        assert_eq!(std::fs::read(&dst).unwrap(), content);
    }

    #[test]
    fn non_sensitive_copy_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("a.gz");
        let staged = tmp.path().join("a.gz.ccp");
        let dst = tmp.path().join("a.out");
        std::fs::write(&src, b"\x1f\x8b already compressed payload").unwrap();

        let info = stage_upload(&src, &staged, None, false).unwrap();
        assert_eq!(info.size_staged, info.size_raw, "plain copy through staging");

        finalize_download(&staged, &dst, None, false).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), std::fs::read(&src).unwrap());
    }

    #[test]
    fn empty_file_roundtrips() {
        let (out, info) = roundtrip(b"", true);
        assert!(out.is_empty());
        assert_eq!(info.size_raw, 0);
    }

    #[test]
    fn corrupted_artifact_never_finalizes_destination() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.bin");
        let staged = tmp.path().join("src.bin.ccp");
        let dst = tmp.path().join("out.bin");
        std::fs::write(&src, vec![5u8; 3 * SEGMENT_SIZE]).unwrap();

        let (private, public) = project_pair();
        let info = stage_upload(&src, &staged, Some(&public), false).unwrap();

        // Flip one ciphertext byte in the middle segment.
        let mut artifact = std::fs::read(&staged).unwrap();
        let idx = 12 + (SEGMENT_SIZE + 16) + (SEGMENT_SIZE + 16) / 2;
        artifact[idx] ^= 0x01;
        std::fs::write(&staged, &artifact).unwrap();

        let (file_public, salt) = info.key_material.as_ref().unwrap();
        let key = derive_download_key(&private, file_public, salt).unwrap();
        assert!(finalize_download(&staged, &dst, Some(&key), false).is_err());
        assert!(!dst.exists(), "failed decrypt must not leave a destination file");
    }
}
