//! Download orchestrator: fetch → decrypt → decompress → verify → register
//!
//! The presigned GET streams into a staging file first; the decryptor then
//! consumes exact cipher segments from disk, so HTTP chunk boundaries never
//! matter. A checksum mismatch marks the file compromised and removes the
//! destination; it can never fall through to a success report.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::info;

use datalift_api::ApiClient;
use datalift_core::StagingFile;
use datalift_crypto::{
    derive_download_key, verify_file, FilePublicKey, ProjectPrivateKey, Salt,
};
use datalift_pipeline::finalize_download;

use crate::ledger::{Ledger, STAGE_GET, STAGE_UPDATE_DB};
use crate::pool::JobError;
use crate::remote::DownloadFile;

/// Shared state for one download run.
pub struct DownloadContext {
    pub api: ApiClient,
    /// The run's `files/` staging root.
    pub staging_root: PathBuf,
    /// `Some` for sensitive projects; fetched once, reused for every file.
    pub project_private: Option<ProjectPrivateKey>,
    pub verify_checksum: bool,
    pub cancel: CancellationToken,
    pub ledger: Arc<Ledger>,
    /// destination path → record, read by the final report.
    pub registry: Arc<Mutex<BTreeMap<String, DownloadFile>>>,
}

impl DownloadContext {
    fn record(&self, key: &str) -> Option<DownloadFile> {
        self.registry.lock().expect("registry lock").get(key).cloned()
    }
}

/// Resolve the per-file shared key from the metadata recorded at upload.
fn file_key(
    private: &ProjectPrivateKey,
    file: &DownloadFile,
) -> Result<datalift_crypto::SharedKey, JobError> {
    let public_hex = file
        .public_key
        .as_deref()
        .ok_or_else(|| JobError::failed("decrypt", "no public key recorded for this file"))?;
    let salt_hex = file
        .salt
        .as_deref()
        .ok_or_else(|| JobError::failed("decrypt", "no salt recorded for this file"))?;
    let file_public =
        FilePublicKey::from_hex(public_hex).map_err(|e| JobError::failed("decrypt", e))?;
    let salt = Salt::from_hex(salt_hex).map_err(|e| JobError::failed("decrypt", e))?;
    derive_download_key(private, &file_public, &salt).map_err(|e| JobError::failed("decrypt", e))
}

/// Drive one file through the download pipeline.
pub async fn download_one(ctx: Arc<DownloadContext>, dest_key: String) -> Result<(), JobError> {
    if ctx.cancel.is_cancelled() {
        return Err(JobError::interrupted());
    }
    let file = ctx
        .record(&dest_key)
        .ok_or_else(|| JobError::failed("prepare", "file missing from download registry"))?;

    if let Some(parent) = file.destination.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            JobError::failed("prepare", format!("creating destination directory: {e}"))
        })?;
    }

    let url = file
        .url
        .as_deref()
        .ok_or_else(|| JobError::failed(STAGE_GET, "no download URL for this file"))?;
    let staging_path = ctx.staging_root.join(&file.staging_name);
    let staging = StagingFile::new(staging_path.clone());

    ctx.ledger.stage_started(&dest_key, STAGE_GET);
    datalift_storage::fetch_presigned(ctx.api.http(), url, staging.path())
        .await
        .map_err(|e| JobError::failed(STAGE_GET, e))?;
    ctx.ledger.stage_done(&dest_key, STAGE_GET);

    if ctx.cancel.is_cancelled() {
        return Err(JobError::interrupted());
    }

    // Decrypt (sensitive projects) and decompress on a blocking thread.
    let key = match &ctx.project_private {
        Some(private) => Some(file_key(private, &file)?),
        None => None,
    };
    let destination = file.destination.clone();
    let compressed = file.compressed;
    let staging_for_task = staging_path.clone();
    tokio::task::spawn_blocking(move || {
        finalize_download(&staging_for_task, &destination, key.as_ref(), compressed)
    })
    .await
    .map_err(|e| JobError::failed("decrypt", format!("decrypt task panicked: {e}")))?
    .map_err(|e| JobError::failed("decrypt", e))?;

    if ctx.verify_checksum && !file.checksum.is_empty() {
        let destination = file.destination.clone();
        let expected = file.checksum.clone();
        let verified =
            tokio::task::spawn_blocking(move || verify_file(&destination, &expected))
                .await
                .map_err(|e| JobError::failed("checksum", format!("verify task panicked: {e}")))?;
        if let Err(e) = verified {
            let _ = std::fs::remove_file(&file.destination);
            return Err(JobError::failed(
                "checksum",
                format!("File integrity compromised: {e}"),
            ));
        }
    }

    ctx.ledger.stage_started(&dest_key, STAGE_UPDATE_DB);
    ctx.api
        .update_file(&file.name)
        .await
        .map_err(|e| JobError::failed(STAGE_UPDATE_DB, e))?;
    ctx.ledger.stage_done(&dest_key, STAGE_UPDATE_DB);

    info!(
        file = %file.name,
        destination = %file.destination.display(),
        bytes = file.size_original,
        "delivered"
    );
    Ok(())
}
