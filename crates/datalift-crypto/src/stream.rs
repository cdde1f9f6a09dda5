//! Segmented ChaCha20-Poly1305 file encryption
//!
//! Encrypted artifact layout (no magic, no version byte):
//! ```text
//! [12 bytes: iv0][seg_0 .. seg_{N-1}][12 bytes: iv_last]
//! ```
//! Plaintext is cut into 65 536-byte segments (last one shorter, non-empty);
//! each ciphertext segment is plaintext + 16-byte tag, AAD empty. Segment `i`
//! is sealed under `nonce_i = (LE(iv0) + i) mod 2^96`; the trailer holds the
//! nonce a segment `N` *would* have used, so any truncation by whole segments
//! shifts the observed trailer and is rejected.
//!
//! An empty plaintext encrypts to 24 bytes with `iv_last == iv0`.

use std::io::{self, Read, Write};
use std::path::Path;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::keys::SharedKey;
use crate::{CIPHER_SEGMENT_SIZE, NONCE_SIZE, SEGMENT_SIZE, TAG_SIZE};

/// Advance a little-endian 96-bit counter nonce by one, wrapping at 2^96.
fn advance_nonce(nonce: &mut [u8; NONCE_SIZE]) {
    for byte in nonce.iter_mut() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}

/// A `Write` sink that seals full 64 KiB segments as they fill up.
///
/// `iv0` is written on construction; [`SegmentEncryptor::finish`] seals the
/// final partial segment (if any) and appends the trailing nonce. Dropping
/// without `finish` produces a torn artifact that decryption will reject.
pub struct SegmentEncryptor<W: Write> {
    out: W,
    cipher: ChaCha20Poly1305,
    /// Nonce for the next segment to be sealed.
    nonce: [u8; NONCE_SIZE],
    buf: Vec<u8>,
}

impl<W: Write> SegmentEncryptor<W> {
    pub fn new(mut out: W, key: &SharedKey) -> io::Result<Self> {
        let mut iv0 = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut iv0);
        out.write_all(&iv0)?;
        Ok(Self {
            out,
            cipher: ChaCha20Poly1305::new(key.as_bytes().into()),
            nonce: iv0,
            buf: Vec::with_capacity(SEGMENT_SIZE),
        })
    }

    fn seal_segment(&mut self) -> io::Result<()> {
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&self.nonce), self.buf.as_slice())
            .map_err(|e| io::Error::other(format!("segment encryption failed: {e}")))?;
        self.out.write_all(&ciphertext)?;
        advance_nonce(&mut self.nonce);
        self.buf.clear();
        Ok(())
    }

    /// Seal the pending partial segment, write the trailing nonce, and return
    /// the inner writer (flushed).
    pub fn finish(mut self) -> io::Result<W> {
        if !self.buf.is_empty() {
            self.seal_segment()?;
        }
        let trailer = self.nonce;
        self.out.write_all(&trailer)?;
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> Write for SegmentEncryptor<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut rest = data;
        while !rest.is_empty() {
            let room = SEGMENT_SIZE - self.buf.len();
            let take = room.min(rest.len());
            self.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buf.len() == SEGMENT_SIZE {
                self.seal_segment()?;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Partial segments stay buffered until finish(); a mid-stream flush
        // must not change the segmentation.
        self.out.flush()
    }
}

/// Decrypt an artifact of known total length from `src` into `sink`.
///
/// `total_len` is the full artifact length including both nonce blocks; the
/// caller typically takes it from file metadata. Incoming bytes are
/// re-buffered into exact 65 552-byte cipher segments, so the reader's own
/// chunk boundaries are irrelevant. Returns the plaintext byte count.
pub fn decrypt_stream<R: Read, W: Write>(
    mut src: R,
    total_len: u64,
    key: &SharedKey,
    mut sink: W,
) -> anyhow::Result<u64> {
    let overhead = 2 * NONCE_SIZE as u64;
    if total_len < overhead {
        anyhow::bail!("encrypted artifact too short: {total_len} bytes");
    }
    let cipher_len = total_len - overhead;
    let tail = cipher_len % CIPHER_SEGMENT_SIZE as u64;
    if tail != 0 && tail <= TAG_SIZE as u64 {
        anyhow::bail!("encrypted artifact has a malformed final segment ({tail} bytes)");
    }

    let mut iv0 = [0u8; NONCE_SIZE];
    src.read_exact(&mut iv0)?;

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let mut nonce = iv0;
    let mut remaining = cipher_len;
    let mut plaintext_len = 0u64;
    let mut segment = vec![0u8; CIPHER_SEGMENT_SIZE];

    while remaining > 0 {
        let take = remaining.min(CIPHER_SEGMENT_SIZE as u64) as usize;
        src.read_exact(&mut segment[..take])?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), &segment[..take])
            .map_err(|_| anyhow::anyhow!("segment authentication failed (corrupted data or wrong key)"))?;
        sink.write_all(&plaintext)?;
        plaintext_len += plaintext.len() as u64;
        advance_nonce(&mut nonce);
        remaining -= take as u64;
    }

    let mut trailer = [0u8; NONCE_SIZE];
    src.read_exact(&mut trailer)?;
    if trailer != nonce {
        anyhow::bail!("trailing nonce mismatch (artifact truncated or reassembled)");
    }

    sink.flush()?;
    Ok(plaintext_len)
}

/// Decrypt an artifact on disk into `sink`.
pub fn decrypt_file<W: Write>(path: &Path, key: &SharedKey, sink: W) -> anyhow::Result<u64> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("opening {}: {e}", path.display()))?;
    let total_len = file.metadata()?.len();
    decrypt_stream(io::BufReader::new(file), total_len, key, sink)
}

/// Encrypted size for a plaintext of `len` bytes.
pub fn encrypted_len(len: u64) -> u64 {
    let segments = len.div_ceil(SEGMENT_SIZE as u64);
    2 * NONCE_SIZE as u64 + len + segments * TAG_SIZE as u64
}
