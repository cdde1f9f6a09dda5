//! Upload orchestrator: stage → put → register, per file
//!
//! Each worker owns its file end to end: staging (hash/compress/encrypt on a
//! blocking thread), the S3 PUT, and the control-plane registration. The
//! staging artifact lives inside a `StagingFile` guard, so it is gone the
//! moment the file reaches a terminal state, success or not. Cancellation is
//! polled at the start and between stages; an in-flight network call is never
//! torn down.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use opendal::Operator;
use tokio_util::sync::CancellationToken;
use tracing::info;

use datalift_api::{ApiClient, NewFileRequest};
use datalift_core::StagingFile;
use datalift_crypto::ProjectPublicKey;
use datalift_pipeline::stage_upload;

use crate::ledger::{Ledger, STAGE_ADD_FILE_DB, STAGE_PUT};
use crate::local::UploadFile;
use crate::pool::JobError;

/// Shared state for one upload run.
pub struct UploadContext {
    pub api: ApiClient,
    pub op: Operator,
    /// The run's `files/` staging root.
    pub staging_root: PathBuf,
    /// `Some` for sensitive projects (encryption mandated), `None` otherwise.
    pub project_public: Option<ProjectPublicKey>,
    pub cancel: CancellationToken,
    pub ledger: Arc<Ledger>,
    /// name → record; staging fills in sizes, checksum and key material, and
    /// the final report reads it back out.
    pub registry: Arc<Mutex<BTreeMap<String, UploadFile>>>,
}

impl UploadContext {
    fn record(&self, name: &str) -> Option<UploadFile> {
        self.registry.lock().expect("registry lock").get(name).cloned()
    }
}

/// Drive one file through the upload pipeline.
pub async fn upload_one(ctx: Arc<UploadContext>, name: String) -> Result<(), JobError> {
    if ctx.cancel.is_cancelled() {
        return Err(JobError::interrupted());
    }
    let file = ctx
        .record(&name)
        .ok_or_else(|| JobError::failed("stage", "file missing from upload registry"))?;

    // Stage into files/<subpath>/<staging_name>.
    let staging_dir = if file.subpath.is_empty() {
        ctx.staging_root.clone()
    } else {
        ctx.staging_root.join(&file.subpath)
    };
    std::fs::create_dir_all(&staging_dir)
        .map_err(|e| JobError::failed("stage", format!("creating staging directory: {e}")))?;
    let staging_path = staging_dir.join(&file.staging_name);
    let staging = StagingFile::new(staging_path.clone());

    let src = file.path.clone();
    let public = ctx.project_public.clone();
    let compress = !file.already_compressed;
    let staged = tokio::task::spawn_blocking(move || {
        stage_upload(&src, &staging_path, public.as_ref(), compress)
    })
    .await
    .map_err(|e| JobError::failed("stage", format!("staging task panicked: {e}")))?
    .map_err(|e| JobError::failed("stage", e))?;

    let request = {
        let mut registry = ctx.registry.lock().expect("registry lock");
        let record = registry
            .get_mut(&name)
            .ok_or_else(|| JobError::failed("stage", "file missing from upload registry"))?;
        record.size_processed = Some(staged.size_staged);
        record.checksum_sha256 = Some(staged.checksum.clone());
        if let Some((file_public, salt)) = &staged.key_material {
            record.public_key = Some(file_public.to_hex());
            record.salt = Some(salt.to_hex());
        }
        NewFileRequest {
            name: record.name.clone(),
            name_in_bucket: record.name_in_bucket.clone(),
            subpath: record.subpath.clone(),
            size: record.size,
            size_processed: staged.size_staged,
            compressed: compress,
            public_key: record.public_key.clone(),
            salt: record.salt.clone(),
            checksum: staged.checksum.clone(),
        }
    };

    if ctx.cancel.is_cancelled() {
        return Err(JobError::interrupted());
    }

    ctx.ledger.stage_started(&name, STAGE_PUT);
    datalift_storage::put_object(&ctx.op, &file.name_in_bucket, staging.path())
        .await
        .map_err(|e| JobError::failed(STAGE_PUT, e))?;
    ctx.ledger.stage_done(&name, STAGE_PUT);

    ctx.ledger.stage_started(&name, STAGE_ADD_FILE_DB);
    ctx.api
        .register_file(&request, file.overwrite)
        .await
        .map_err(|e| JobError::failed(STAGE_ADD_FILE_DB, e))?;
    ctx.ledger.stage_done(&name, STAGE_ADD_FILE_DB);

    info!(
        file = %name,
        key = %file.name_in_bucket,
        raw = file.size,
        staged = staged.size_staged,
        overwrite = file.overwrite,
        "uploaded"
    );
    // `staging` drops here; the artifact is removed now that the file is
    // terminal.
    Ok(())
}
