//! X25519 + HKDF-SHA256 key agreement
//!
//! Keys travel as hex strings on the wire and as opaque byte newtypes inside
//! the pipeline. The distinct types keep a peer public key from ever being
//! handed to an AEAD, and the shared key from leaking into metadata.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{KEY_SIZE, SALT_SIZE};

/// The long-lived project public key (upload peer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPublicKey([u8; KEY_SIZE]);

/// The long-lived project private key (download side). Zeroized on drop.
#[derive(Clone)]
pub struct ProjectPrivateKey([u8; KEY_SIZE]);

/// The public half of a per-file ephemeral key, as recorded in file metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePublicKey([u8; KEY_SIZE]);

/// The 16-byte HKDF salt stored alongside the file public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

/// The derived 256-bit symmetric key. Never persisted; zeroized on drop.
#[derive(Clone)]
pub struct SharedKey([u8; KEY_SIZE]);

fn parse_hex<const N: usize>(hex_str: &str, what: &str) -> anyhow::Result<[u8; N]> {
    let raw = hex::decode(hex_str.trim())
        .map_err(|e| anyhow::anyhow!("{what}: invalid hex: {e}"))?;
    let got = raw.len();
    raw.try_into()
        .map_err(|_| anyhow::anyhow!("{what}: expected {N} bytes, got {got}"))
}

impl ProjectPublicKey {
    pub fn from_hex(hex_str: &str) -> anyhow::Result<Self> {
        Ok(Self(parse_hex(hex_str, "project public key")?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl ProjectPrivateKey {
    pub fn from_hex(hex_str: &str) -> anyhow::Result<Self> {
        Ok(Self(parse_hex(hex_str, "project private key")?))
    }
}

impl Drop for ProjectPrivateKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for ProjectPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectPrivateKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl FilePublicKey {
    pub fn from_hex(hex_str: &str) -> anyhow::Result<Self> {
        Ok(Self(parse_hex(hex_str, "file public key")?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl Salt {
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_hex(hex_str: &str) -> anyhow::Result<Self> {
        Ok(Self(parse_hex(hex_str, "salt")?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

impl SharedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl Drop for SharedKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// HKDF-SHA256 over the raw X25519 shared secret, empty info, 32-byte output.
fn expand_shared(secret: &[u8; KEY_SIZE], salt: &Salt) -> anyhow::Result<SharedKey> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt.as_bytes()), secret);
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(b"", &mut okm)
        .map_err(|e| anyhow::anyhow!("HKDF expand failed: {e}"))?;
    Ok(SharedKey(okm))
}

/// Upload-side agreement: fresh ephemeral X25519 pair for one file.
///
/// Returns the derived shared key plus the only two artifacts that survive it:
/// the ephemeral public component and a fresh random salt. The ephemeral
/// private component is consumed by the exchange and never observable.
pub fn derive_upload_key(
    project_public: &ProjectPublicKey,
) -> anyhow::Result<(SharedKey, FilePublicKey, Salt)> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let file_public = FilePublicKey(PublicKey::from(&ephemeral).to_bytes());

    let peer = PublicKey::from(project_public.0);
    let shared = ephemeral.diffie_hellman(&peer);

    let salt = Salt::random();
    let key = expand_shared(shared.as_bytes(), &salt)?;
    Ok((key, file_public, salt))
}

/// Download-side agreement: project private key against the per-file public
/// component and salt recorded at upload time.
pub fn derive_download_key(
    project_private: &ProjectPrivateKey,
    file_public: &FilePublicKey,
    salt: &Salt,
) -> anyhow::Result<SharedKey> {
    let secret = StaticSecret::from(project_private.0);
    let peer = PublicKey::from(file_public.0);
    let shared = secret.diffie_hellman(&peer);
    expand_shared(shared.as_bytes(), salt)
}
