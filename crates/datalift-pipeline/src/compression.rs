//! Compressed-format detection and zstd streaming
//!
//! Files that already carry a known compressed-format magic are passed through
//! staging verbatim; everything else goes through a level-4 zstd stream with
//! the frame content checksum enabled.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// zstd compression level used for staging.
pub const ZSTD_LEVEL: i32 = 4;

/// Longest magic in [`MAGIC_NUMBERS`].
pub const MAX_MAGIC_LEN: usize = 8;

/// Known compressed-format magics, longest-match first where prefixes overlap
/// (rar v5 before rar v4).
pub const MAGIC_NUMBERS: &[(&[u8], &str)] = &[
    (b"\x91\x33HF", "hap"),
    (b"\x60\xea", "arj"),
    (b"_\x27\xa8\x89", "jar"),
    (b"ZOO ", "zoo"),
    (b"PK\x03\x04", "zip"),
    (b"UFA\xc6\xd2\xc1", "ufa"),
    (b"StuffIt ", "sit"),
    (b"Rar!\x1a\x07\x01\x00", "rar v5"),
    (b"Rar!\x1a\x07\x00", "rar v4.x"),
    (b"MAr0\x00", "mar"),
    (b"DMS!", "dms"),
    (b"CRUSH v", "cru"),
    (b"BZh", "bzip2"),
    (b"-lh", "lha"),
    (b"(This fi", "hqx"),
    (b"!\x12", "ain"),
    (b"\x1a\x0b", "pak"),
    (b"\x28\xb5\x2f\xfd", "zstd"),
    (b"\x1f\x8b", "gzip"),
];

/// Match the first bytes of a file against the magic table.
pub fn compressed_format(head: &[u8]) -> Option<&'static str> {
    MAGIC_NUMBERS
        .iter()
        .find(|(magic, _)| head.len() >= magic.len() && &head[..magic.len()] == *magic)
        .map(|(_, name)| *name)
}

/// Read up to [`MAX_MAGIC_LEN`] bytes from the file head and classify it.
/// Returns the detected format name, or `None` for plain files.
pub fn detect_compressed(path: &Path) -> anyhow::Result<Option<&'static str>> {
    let mut file = File::open(path)
        .map_err(|e| anyhow::anyhow!("opening {}: {e}", path.display()))?;
    let mut head = [0u8; MAX_MAGIC_LEN];
    let mut filled = 0;
    while filled < MAX_MAGIC_LEN {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(compressed_format(&head[..filled]))
}

/// Level-4 zstd stream encoder with the frame content checksum enabled.
/// Call `.finish()` to flush the final block.
pub fn zstd_writer<W: Write>(inner: W) -> io::Result<zstd::stream::write::Encoder<'static, W>> {
    let mut encoder = zstd::stream::write::Encoder::new(inner, ZSTD_LEVEL)?;
    encoder.include_checksum(true)?;
    Ok(encoder)
}

/// Write-side zstd decoder: compressed bytes written in, plaintext out to
/// `inner`. Used when decrypted segments are produced incrementally.
pub fn zstd_decode_writer<W: Write>(inner: W) -> io::Result<zstd::stream::write::Decoder<'static, W>> {
    zstd::stream::write::Decoder::new(inner)
}

/// Stream-decode a whole zstd frame from `src` into `dst`.
pub fn zstd_copy_decode<R: Read, W: Write>(src: R, mut dst: W) -> anyhow::Result<()> {
    zstd::stream::copy_decode(src, &mut dst).map_err(|e| anyhow::anyhow!("zstd decode: {e}"))?;
    dst.flush()?;
    Ok(())
}
