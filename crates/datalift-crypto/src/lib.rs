//! datalift-crypto: interoperable upload/download cryptography
//!
//! Pipeline position: plaintext → (zstd) → **segment AEAD** → object store
//!
//! Key hierarchy:
//! ```text
//! Project key pair (long-lived X25519, issued by the control plane)
//!   upload:   shared = HKDF-SHA256(X25519(file_ephemeral, project_public), salt)
//!   download: shared = HKDF-SHA256(X25519(project_private, file_public), salt)
//! Per-file AEAD: ChaCha20-Poly1305 (IETF) over 64 KiB segments with a
//!   little-endian counter nonce and a trailing-nonce truncation marker
//! ```
//!
//! Only the ephemeral public component and the salt are ever persisted; the
//! shared key and private components are zeroized on drop.

pub mod checksum;
pub mod keys;
pub mod stream;

pub use checksum::{sha256_file, verify_file, Checksum};
pub use keys::{
    derive_download_key, derive_upload_key, FilePublicKey, ProjectPrivateKey, ProjectPublicKey,
    Salt, SharedKey,
};
pub use stream::{decrypt_file, decrypt_stream, SegmentEncryptor};

/// Size of the shared symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a ChaCha20-Poly1305 (IETF) nonce
pub const NONCE_SIZE: usize = 12;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the HKDF salt
pub const SALT_SIZE: usize = 16;

/// Plaintext bytes encrypted under one nonce
pub const SEGMENT_SIZE: usize = 65_536;

/// On-disk bytes of one full ciphertext segment
pub const CIPHER_SEGMENT_SIZE: usize = SEGMENT_SIZE + TAG_SIZE;
