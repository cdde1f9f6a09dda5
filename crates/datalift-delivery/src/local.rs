//! Local file handler: enumerate user input, classify, assign bucket keys
//!
//! User input is a set of explicit paths plus an optional newline-delimited
//! source file. Directories recurse with their relative subpath preserved;
//! symlinks are resolved at the top level, broken or looping links are warned
//! and skipped, as are sockets/devices. Every surviving file gets a
//! deterministic remote object key and a compressed-format classification.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::warn;
use uuid::Uuid;

use datalift_api::ApiClient;
use datalift_core::{DeliveryError, MAX_REMOTE_KEY_BYTES};
use datalift_pipeline::detect_compressed;

/// One file slated for upload, keyed by its user-facing relative `name`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UploadFile {
    /// User-facing path within the input root, forward slashes.
    pub name: String,
    /// Absolute source path.
    #[serde(skip)]
    pub path: PathBuf,
    /// Directory portion of `name` ("" for top-level files).
    pub subpath: String,
    /// Raw size in bytes.
    pub size: u64,
    /// The source already carries a compressed-format magic; staging copies
    /// bytes through instead of re-compressing.
    pub already_compressed: bool,
    /// Remote object key: `<subpath>/<uuid5(name)>`.
    pub name_in_bucket: String,
    /// Set when the control plane already knows this name and the user asked
    /// to overwrite; the existing remote key is reused.
    pub overwrite: bool,
    /// Staging artifact filename (`<file>[.zst].ccp`).
    pub staging_name: String,
    /// Size of the staged artifact; filled during staging.
    pub size_processed: Option<u64>,
    /// Plaintext SHA-256, lowercase hex; filled during staging.
    pub checksum_sha256: Option<String>,
    /// Ephemeral public component, upper-hex; filled during encryption.
    pub public_key: Option<String>,
    /// HKDF salt, upper-hex; filled during encryption.
    pub salt: Option<String>,
}

/// Enumeration result: uploadable files plus per-path failures.
#[derive(Debug, Default)]
pub struct LocalFileHandler {
    pub files: BTreeMap<String, UploadFile>,
    /// name → failure message, merged into the final report.
    pub failed: BTreeMap<String, String>,
}

/// Deterministic remote object key for a relative file name.
///
/// The UUID is v5 over the name against a fixed namespace, so the same
/// relative name maps to the same key on every run.
pub fn bucket_key(subpath: &str, name: &str) -> Result<String, DeliveryError> {
    let file_uuid = Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes());
    let key = if subpath.is_empty() {
        file_uuid.to_string()
    } else {
        format!("{subpath}/{file_uuid}")
    };
    if key.len() > MAX_REMOTE_KEY_BYTES {
        return Err(DeliveryError::RemoteKeyTooLong {
            got: key.len(),
            max: MAX_REMOTE_KEY_BYTES,
        });
    }
    Ok(key)
}

/// Staging artifact name: `.zst` appended when the core will compress,
/// `.ccp` always. Local convention only; the remote key is independent.
fn staging_name(file_name: &str, already_compressed: bool) -> String {
    if already_compressed {
        format!("{file_name}.ccp")
    } else {
        format!("{file_name}.zst.ccp")
    }
}

/// Enumerate all upload inputs.
///
/// An empty effective input set is an input error that aborts the run;
/// per-path problems only fail that path.
pub fn collect_upload_files(
    paths: &[PathBuf],
    source_path_file: Option<&Path>,
) -> Result<LocalFileHandler> {
    let mut roots: Vec<PathBuf> = paths.to_vec();
    if let Some(list) = source_path_file {
        let raw = std::fs::read_to_string(list)
            .map_err(|e| anyhow::anyhow!("reading source file {}: {e}", list.display()))?;
        roots.extend(
            raw.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(PathBuf::from),
        );
    }
    if roots.is_empty() {
        return Err(DeliveryError::Input("no input paths given".into()).into());
    }

    let mut handler = LocalFileHandler::default();
    for root in roots {
        add_root(&mut handler, &root);
    }
    if handler.files.is_empty() && handler.failed.is_empty() {
        return Err(DeliveryError::Input("no uploadable files found in the given paths".into()).into());
    }
    Ok(handler)
}

fn add_root(handler: &mut LocalFileHandler, root: &Path) {
    // metadata() follows symlinks, so a top-level link lands on its target.
    let meta = match std::fs::metadata(root) {
        Ok(meta) => meta,
        Err(_) if std::fs::symlink_metadata(root).is_ok() => {
            warn!(path = %root.display(), "skipping broken or looping symlink");
            return;
        }
        Err(e) => {
            handler
                .failed
                .insert(root.display().to_string(), format!("Cannot read path: {e}"));
            return;
        }
    };

    if meta.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string());
        add_file(handler, name, root.to_path_buf(), meta.len());
    } else if meta.is_dir() {
        let root_name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string());
        walk_dir(handler, &root_name, root);
    } else {
        warn!(path = %root.display(), "skipping non-file, non-directory entry");
    }
}

fn walk_dir(handler: &mut LocalFileHandler, prefix: &str, dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            handler
                .failed
                .insert(prefix.to_string(), format!("Cannot read directory: {e}"));
            return;
        }
    };
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        let entry_name = entry.file_name().to_string_lossy().to_string();
        let name = format!("{prefix}/{entry_name}");

        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(_) => {
                warn!(path = %path.display(), "skipping unreadable entry (broken link?)");
                continue;
            }
        };
        if meta.is_dir() {
            walk_dir(handler, &name, &path);
        } else if meta.is_file() {
            add_file(handler, name, path, meta.len());
        } else {
            warn!(path = %path.display(), "skipping special file");
        }
    }
}

fn add_file(handler: &mut LocalFileHandler, name: String, path: PathBuf, size: u64) {
    if handler.files.contains_key(&name) {
        handler
            .failed
            .insert(name, "Path specified more than once".to_string());
        return;
    }

    let already_compressed = match detect_compressed(&path) {
        Ok(format) => {
            if let Some(format) = &format {
                tracing::debug!(file = %name, format, "already-compressed input");
            }
            format.is_some()
        }
        Err(e) => {
            handler.failed.insert(name, format!("Cannot read file: {e}"));
            return;
        }
    };

    let subpath = match name.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    };
    let name_in_bucket = match bucket_key(&subpath, &name) {
        Ok(key) => key,
        Err(e) => {
            handler.failed.insert(name, e.to_string());
            return;
        }
    };
    let file_name = name.rsplit('/').next().unwrap_or(&name).to_string();

    handler.files.insert(
        name.clone(),
        UploadFile {
            staging_name: staging_name(&file_name, already_compressed),
            name,
            path,
            subpath,
            size,
            already_compressed,
            name_in_bucket,
            overwrite: false,
            size_processed: None,
            checksum_sha256: None,
            public_key: None,
            salt: None,
        },
    );
}

/// Duplicate pre-check against the control plane.
///
/// Files the project already holds either fail ("File already uploaded") or,
/// with `overwrite`, reuse the stored remote key so the object's lineage is
/// preserved.
pub async fn apply_match_check(
    handler: &mut LocalFileHandler,
    api: &ApiClient,
    overwrite: bool,
) -> Result<()> {
    if handler.files.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = handler.files.keys().cloned().collect();
    let matched = api.match_files(&names).await?;

    for (name, existing_key) in matched {
        if overwrite {
            if let Some(file) = handler.files.get_mut(&name) {
                file.name_in_bucket = existing_key;
                file.overwrite = true;
            }
        } else if handler.files.remove(&name).is_some() {
            handler
                .failed
                .insert(name, "File already uploaded".to_string());
        }
    }
    Ok(())
}
