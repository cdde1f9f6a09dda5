//! Integration test: stage → store → fetch → finalize round-trip
//!
//! Exercises the full per-file pipeline (compress/encrypt at staging time,
//! decrypt/decompress at finalize time) against OpenDAL's in-memory backend,
//! so no live object store or control plane is required.

use std::path::{Path, PathBuf};

use opendal::Operator;
use tempfile::TempDir;
use x25519_dalek::{PublicKey, StaticSecret};

use datalift_crypto::{
    derive_download_key, sha256_file, verify_file, ProjectPrivateKey, ProjectPublicKey,
    NONCE_SIZE, SEGMENT_SIZE, TAG_SIZE,
};
use datalift_pipeline::{finalize_download, stage_upload};

fn memory_operator() -> Operator {
    Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

fn project_pair() -> (ProjectPrivateKey, ProjectPublicKey) {
    let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let public = PublicKey::from(&secret);
    let private = ProjectPrivateKey::from_hex(&hex::encode_upper(secret.to_bytes())).unwrap();
    let public = ProjectPublicKey::from_hex(&hex::encode_upper(public.to_bytes())).unwrap();
    (private, public)
}

fn write_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write test file");
    path
}

/// Push one file through stage → put → read-back → finalize.
async fn roundtrip(
    content: &[u8],
    keys: Option<&(ProjectPrivateKey, ProjectPublicKey)>,
    compress: bool,
) -> (u64, Vec<u8>) {
    let tmp = TempDir::new().unwrap();
    let op = memory_operator();

    let src = write_test_file(tmp.path(), "input.bin", content);
    let staged = tmp.path().join("input.bin.ccp");
    let fetched = tmp.path().join("fetched.ccp");
    let dst = tmp.path().join("out/input.bin");
    std::fs::create_dir_all(dst.parent().unwrap()).unwrap();

    let result = stage_upload(&src, &staged, keys.map(|(_, p)| p), compress).expect("staging");
    assert_eq!(result.size_raw, content.len() as u64);
    assert_eq!(
        result.size_staged,
        std::fs::metadata(&staged).unwrap().len(),
        "recorded staged size must match the artifact"
    );

    datalift_storage::put_object(&op, "sub/key", &staged)
        .await
        .expect("put");

    // Simulate the presigned GET: pull the stored bytes into a staging file.
    let stored = op.read("sub/key").await.expect("read back").to_vec();
    assert_eq!(stored.len() as u64, result.size_staged);
    std::fs::write(&fetched, &stored).unwrap();

    let key = keys.map(|(private, _)| {
        let (public, salt) = result.key_material.as_ref().expect("key material recorded");
        derive_download_key(private, public, salt).expect("key derivation")
    });
    let written =
        finalize_download(&fetched, &dst, key.as_ref(), compress).expect("finalize");
    assert_eq!(written, content.len() as u64);

    verify_file(&dst, &result.checksum).expect("plaintext checksum must survive the round-trip");
    (result.size_staged, std::fs::read(&dst).unwrap())
}

#[tokio::test]
async fn sensitive_compressible_roundtrip() {
    let content: Vec<u8> = b"datalift datalift datalift "
        .iter()
        .cycle()
        .take(200_000)
        .copied()
        .collect();
    let keys = project_pair();
    let (staged, out) = roundtrip(&content, Some(&keys), true).await;
    assert_eq!(out, content);
    // Repetitive input: the compressed-then-encrypted artifact should shrink.
    assert!(staged < content.len() as u64);
}

#[tokio::test]
async fn sensitive_already_compressed_roundtrip() {
    // Pseudo-random bytes stand in for an already-compressed input.
    let content: Vec<u8> = (0u64..150_000)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 5)) as u8)
        .collect();
    let keys = project_pair();
    let (staged, out) = roundtrip(&content, Some(&keys), false).await;
    assert_eq!(out, content);

    // Encryption-only path: artifact size is exactly determined by length.
    let n = content.len() as u64;
    let segments = n.div_ceil(SEGMENT_SIZE as u64);
    let expected = 2 * NONCE_SIZE as u64 + segments * TAG_SIZE as u64 + n;
    assert_eq!(staged, expected);
}

#[tokio::test]
async fn non_sensitive_roundtrip() {
    let content = b"plain project data, compressed but never encrypted".repeat(512);
    let (_, out) = roundtrip(&content, None, true).await;
    assert_eq!(out, content);
}

#[tokio::test]
async fn empty_file_roundtrip() {
    let keys = project_pair();
    let (staged, out) = roundtrip(b"", Some(&keys), false).await;
    assert!(out.is_empty());
    // Zero segments: leading nonce + trailing nonce only.
    assert_eq!(staged, 2 * NONCE_SIZE as u64);
}

#[tokio::test]
async fn tampered_object_fails_and_removes_destination() {
    let tmp = TempDir::new().unwrap();
    let keys = project_pair();

    let content = vec![0x5au8; 80_000];
    let src = write_test_file(tmp.path(), "input.bin", &content);
    let staged = tmp.path().join("input.bin.ccp");
    let dst = tmp.path().join("input.out");

    let result = stage_upload(&src, &staged, Some(&keys.1), false).expect("staging");
    let (public, salt) = result.key_material.as_ref().unwrap();
    let key = derive_download_key(&keys.0, public, salt).unwrap();

    // Flip one ciphertext byte inside the first segment.
    let mut artifact = std::fs::read(&staged).unwrap();
    artifact[NONCE_SIZE + 100] ^= 0x01;
    let fetched = tmp.path().join("fetched.ccp");
    std::fs::write(&fetched, &artifact).unwrap();

    let err = finalize_download(&fetched, &dst, Some(&key), false).unwrap_err();
    assert!(
        err.to_string().contains("authentication"),
        "unexpected error: {err}"
    );
    assert!(!dst.exists(), "tampered output must not be left behind");
}

#[tokio::test]
async fn checksum_catches_wrong_plaintext() {
    let tmp = TempDir::new().unwrap();
    let path = write_test_file(tmp.path(), "a.txt", b"actual contents");
    let other = sha256_file(&write_test_file(tmp.path(), "b.txt", b"other contents")).unwrap();
    let err = verify_file(&path, &other).unwrap_err();
    assert!(err.to_string().contains("checksum mismatch"), "unexpected error: {err}");
}
