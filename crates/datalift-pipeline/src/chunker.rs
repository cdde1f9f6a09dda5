//! Fixed-size plaintext chunk reader
//!
//! Reads a file sequentially in 64 KiB chunks (the final chunk may be shorter
//! and non-empty), reusing one buffer for the file's lifetime. No retries: an
//! unreadable source fails the file at this layer.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Plaintext chunk size; equal to the cipher segment size so a pass-through
/// (already compressed) file maps one chunk to one AEAD segment.
pub const CHUNK_SIZE: usize = datalift_crypto::SEGMENT_SIZE;

pub struct ChunkReader<R: Read> {
    src: R,
    buf: Vec<u8>,
}

impl ChunkReader<BufReader<File>> {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .map_err(|e| anyhow::anyhow!("opening {}: {e}", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> ChunkReader<R> {
    pub fn new(src: R) -> Self {
        Self {
            src,
            buf: vec![0u8; CHUNK_SIZE],
        }
    }

    /// Next chunk, or `None` at end of input. The returned slice borrows the
    /// internal buffer and is valid until the next call.
    pub fn next_chunk(&mut self) -> io::Result<Option<&[u8]>> {
        let mut filled = 0;
        while filled < CHUNK_SIZE {
            let n = self.src.read(&mut self.buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            Ok(None)
        } else {
            Ok(Some(&self.buf[..filled]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multiple_yields_full_chunks() {
        let data = vec![1u8; 2 * CHUNK_SIZE];
        let mut reader = ChunkReader::new(&data[..]);
        assert_eq!(reader.next_chunk().unwrap().unwrap().len(), CHUNK_SIZE);
        assert_eq!(reader.next_chunk().unwrap().unwrap().len(), CHUNK_SIZE);
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn trailing_partial_chunk() {
        let data = vec![2u8; CHUNK_SIZE + 17];
        let mut reader = ChunkReader::new(&data[..]);
        assert_eq!(reader.next_chunk().unwrap().unwrap().len(), CHUNK_SIZE);
        assert_eq!(reader.next_chunk().unwrap().unwrap().len(), 17);
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn empty_input_yields_nothing() {
        let mut reader = ChunkReader::new(&b""[..]);
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn short_reads_are_coalesced() {
        struct Dribble<'a>(&'a [u8]);
        impl Read for Dribble<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0.is_empty() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.0[0];
                self.0 = &self.0[1..];
                Ok(1)
            }
        }

        let data = vec![3u8; CHUNK_SIZE + 1];
        let mut reader = ChunkReader::new(Dribble(&data));
        assert_eq!(reader.next_chunk().unwrap().unwrap().len(), CHUNK_SIZE);
        assert_eq!(reader.next_chunk().unwrap().unwrap().len(), 1);
        assert!(reader.next_chunk().unwrap().is_none());
    }
}
