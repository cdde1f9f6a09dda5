//! datalift-pipeline: the per-file streaming pipeline
//!
//! - `chunker`: lazy fixed-size (64 KiB) plaintext chunk reader
//! - `compression`: compressed-format magic detection + zstd streaming
//! - `stage`: upload staging (hash → compress → encrypt → staging file) and
//!   download finalization (decrypt → decompress → destination file)

pub mod chunker;
pub mod compression;
pub mod stage;

pub use chunker::{ChunkReader, CHUNK_SIZE};
pub use compression::{detect_compressed, zstd_decode_writer, zstd_writer, ZSTD_LEVEL};
pub use stage::{finalize_download, stage_upload, StagedUpload};
