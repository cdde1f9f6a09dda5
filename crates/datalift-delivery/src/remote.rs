//! Remote file handler: resolve requested paths against control-plane metadata
//!
//! Turns user-supplied remote paths (files or folders) or a whole-project
//! request into per-file download records keyed by destination path. The
//! destination layout preserves the control-plane subpath under the
//! user-chosen destination root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;

use datalift_api::{ApiClient, FileInfoRecord};

/// One file slated for download, keyed by its destination path.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DownloadFile {
    /// Control-plane name (relative path recorded at upload).
    pub name: String,
    pub name_in_bucket: String,
    /// Final plaintext path under the destination root.
    pub destination: PathBuf,
    pub subpath: String,
    pub size_stored: u64,
    pub size_original: u64,
    /// Per-file public component / salt recorded at upload; absent for files
    /// from non-sensitive projects.
    pub public_key: Option<String>,
    pub salt: Option<String>,
    /// Expected plaintext SHA-256, lowercase hex.
    pub checksum: String,
    /// The stored bytes are zstd-framed.
    pub compressed: bool,
    /// Presigned download URL.
    pub url: Option<String>,
    /// Unique staging artifact name (derived from the remote key).
    pub staging_name: String,
}

#[derive(Debug, Default)]
pub struct RemoteFileHandler {
    pub files: BTreeMap<String, DownloadFile>,
    /// requested path → failure message.
    pub failed: BTreeMap<String, String>,
}

fn to_download_file(record: FileInfoRecord, destination_root: &Path) -> DownloadFile {
    let mut destination = destination_root.to_path_buf();
    for part in record.subpath.split('/').filter(|p| !p.is_empty()) {
        destination.push(part);
    }
    let file_name = record.name.rsplit('/').next().unwrap_or(&record.name);
    destination.push(file_name);

    DownloadFile {
        // Remote keys contain '/'; flatten for a unique staging filename.
        staging_name: format!("{}.ccp", record.name_in_bucket.replace('/', "_")),
        name: record.name,
        name_in_bucket: record.name_in_bucket,
        destination,
        subpath: record.subpath,
        size_stored: record.size_stored,
        size_original: record.size_original,
        public_key: record.public_key,
        salt: record.salt,
        checksum: record.checksum_sha256,
        compressed: record.compressed,
        url: record.url,
    }
}

/// Resolve download requests to per-file records.
///
/// `get_all` ignores `paths` and takes the whole project. Paths the control
/// plane does not know become failed entries.
pub async fn resolve_download_files(
    api: &ApiClient,
    paths: &[String],
    get_all: bool,
    destination_root: &Path,
) -> Result<RemoteFileHandler> {
    if !get_all && paths.is_empty() {
        anyhow::bail!("no remote paths requested");
    }
    let response = if get_all {
        api.file_info_all().await?
    } else {
        api.file_info(paths).await?
    };

    let mut handler = RemoteFileHandler::default();
    let records = response
        .files
        .into_values()
        .chain(response.folder_contents.into_values().flat_map(BTreeMap::into_values));
    for record in records {
        let file = to_download_file(record, destination_root);
        handler
            .files
            .insert(file.destination.display().to_string(), file);
    }
    for path in response.not_found {
        handler.failed.insert(path, "Not found in DB.".to_string());
    }

    tracing::debug!(
        files = handler.files.len(),
        not_found = handler.failed.len(),
        "download set resolved"
    );
    Ok(handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, subpath: &str) -> FileInfoRecord {
        FileInfoRecord {
            name: name.to_string(),
            name_in_bucket: format!("{subpath}/0000-1111").trim_start_matches('/').to_string(),
            subpath: subpath.to_string(),
            size_original: 10,
            size_stored: 45,
            compressed: true,
            public_key: Some("AB".repeat(32)),
            salt: Some("CD".repeat(16)),
            checksum_sha256: "aa".repeat(32),
            url: Some("https://store.example/presigned".into()),
        }
    }

    #[test]
    fn destination_preserves_subpath() {
        let dest = Path::new("/download/root");
        let file = to_download_file(record("data/inner/f.txt", "data/inner"), dest);
        assert_eq!(file.destination, Path::new("/download/root/data/inner/f.txt"));
        assert_eq!(file.staging_name, "data_inner_0000-1111.ccp");
    }

    #[test]
    fn top_level_file_lands_in_root() {
        let dest = Path::new("/dl");
        let file = to_download_file(record("f.txt", ""), dest);
        assert_eq!(file.destination, Path::new("/dl/f.txt"));
    }

    #[test]
    fn staging_names_unique_across_subpaths() {
        let dest = Path::new("/dl");
        let mut a = record("x/f.txt", "x");
        a.name_in_bucket = "x/abc".into();
        let mut b = record("y/f.txt", "y");
        b.name_in_bucket = "y/abc".into();
        let fa = to_download_file(a, dest);
        let fb = to_download_file(b, dest);
        assert_ne!(fa.staging_name, fb.staging_name);
    }
}
