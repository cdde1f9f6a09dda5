//! Wire models for the control-plane endpoints

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `GET /file/match` — names already known to the project.
#[derive(Debug, Deserialize)]
pub struct MatchFilesResponse {
    /// name → existing remote object key; `null` when nothing matches.
    pub files: Option<BTreeMap<String, String>>,
}

/// Plain `{message}` acknowledgement.
#[derive(Debug, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

/// Registration payload for `POST`/`PUT /file/new`.
///
/// `compressed` means "the stored bytes are zstd-framed".
#[derive(Debug, Clone, Serialize)]
pub struct NewFileRequest {
    pub name: String,
    pub name_in_bucket: String,
    pub subpath: String,
    pub size: u64,
    pub size_processed: u64,
    pub compressed: bool,
    pub public_key: Option<String>,
    pub salt: Option<String>,
    pub checksum: String,
}

/// Per-file metadata returned by `/file/info` and `/file/all/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfoRecord {
    pub name: String,
    pub name_in_bucket: String,
    #[serde(default)]
    pub subpath: String,
    pub size_original: u64,
    pub size_stored: u64,
    /// The stored bytes are zstd-framed.
    pub compressed: bool,
    /// Per-file ephemeral public component, upper-hex; absent for files from
    /// non-sensitive projects.
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub checksum_sha256: String,
    /// Presigned download URL; treated as an opaque HTTPS GET.
    #[serde(default)]
    pub url: Option<String>,
}

/// `GET /file/info` / `GET /file/all/info` resolution result.
#[derive(Debug, Default, Deserialize)]
pub struct FileInfoResponse {
    #[serde(default)]
    pub files: BTreeMap<String, FileInfoRecord>,
    #[serde(default)]
    pub folder_contents: BTreeMap<String, BTreeMap<String, FileInfoRecord>>,
    #[serde(default)]
    pub not_found: Vec<String>,
}

/// `GET /proj/public`.
#[derive(Debug, Deserialize)]
pub struct PublicKeyResponse {
    pub sensitive: bool,
    /// Project public key, upper-hex; `null` for non-sensitive projects.
    pub public: Option<String>,
}

/// `GET /proj/private` (slow on the server side).
#[derive(Debug, Deserialize)]
pub struct PrivateKeyResponse {
    pub private: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Credentials {
    pub access_key: String,
    pub secret_key: String,
}

/// `GET /s3/proj` — object-store coordinates for a project.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Info {
    pub safespring_project: String,
    pub keys: S3Credentials,
    pub url: String,
    pub bucket: String,
}
