//! Whole-run composition: key material, file sets, pool, report
//!
//! These are the two entry points the CLI drives. Configuration errors (a
//! sensitive project without a public key, a missing private key) abort the
//! run before any file moves; per-file errors only ever mark their file.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use datalift_api::ApiClient;
use datalift_core::WorkDir;
use datalift_crypto::{ProjectPrivateKey, ProjectPublicKey};

use crate::download::{download_one, DownloadContext};
use crate::ledger::Ledger;
use crate::local::{apply_match_check, collect_upload_files};
use crate::pool::{run_pool, PoolSummary};
use crate::remote::resolve_download_files;
use crate::report::{log_failure_summary, write_failure_log};
use crate::upload::{upload_one, UploadContext};

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub paths: Vec<PathBuf>,
    pub source_path_file: Option<PathBuf>,
    pub overwrite: bool,
    pub workers: usize,
    pub break_on_fail: bool,
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub paths: Vec<String>,
    pub get_all: bool,
    pub destination: PathBuf,
    pub workers: usize,
    pub break_on_fail: bool,
    pub verify_checksum: bool,
}

/// What a finished run looks like to the caller.
#[derive(Debug)]
pub struct RunReport {
    pub summary: PoolSummary,
    /// True when the failure log exists; the process must exit non-zero.
    pub failed_log_written: bool,
    pub failed_log_path: PathBuf,
}

/// Upload-side project key material, or `None` for non-sensitive projects.
async fn upload_key_material(api: &ApiClient) -> Result<Option<ProjectPublicKey>> {
    let response = api.project_public().await?;
    if !response.sensitive {
        debug!("non-sensitive project: compression only, no encryption");
        return Ok(None);
    }
    let hex_key = response.public.ok_or_else(|| {
        datalift_core::DeliveryError::Config(
            "sensitive project has no public key; contact the project owner".into(),
        )
    })?;
    Ok(Some(ProjectPublicKey::from_hex(&hex_key)?))
}

/// Run a full upload. `on_complete` fires once per finished file.
pub async fn run_upload(
    api: ApiClient,
    workdir: &WorkDir,
    options: UploadOptions,
    cancel: CancellationToken,
    on_complete: impl FnMut(&str),
) -> Result<RunReport> {
    let project_public = upload_key_material(&api).await?;

    let mut handler =
        collect_upload_files(&options.paths, options.source_path_file.as_deref())?;
    apply_match_check(&mut handler, &api, options.overwrite)
        .await
        .context("checking for already-uploaded files")?;
    info!(
        project = api.project(),
        files = handler.files.len(),
        precheck_failed = handler.failed.len(),
        "upload set collected"
    );

    let s3 = api.s3_info().await.context("resolving project bucket")?;
    let op = datalift_storage::build_operator(&s3)?;

    let ledger = Arc::new(Ledger::new());
    let names: Vec<String> = handler.files.keys().cloned().collect();
    for name in &names {
        ledger.register(name);
    }
    let registry = Arc::new(Mutex::new(handler.files));

    let ctx = Arc::new(UploadContext {
        api,
        op,
        staging_root: workdir.files(),
        project_public,
        cancel: cancel.clone(),
        ledger: ledger.clone(),
        registry: registry.clone(),
    });

    let jobs: Vec<_> = names
        .into_iter()
        .map(|name| {
            let ctx = ctx.clone();
            (name.clone(), upload_one(ctx, name))
        })
        .collect();
    let summary = run_pool(
        jobs,
        options.workers,
        options.break_on_fail,
        cancel,
        ledger.clone(),
        on_complete,
    )
    .await;

    let records = registry.lock().expect("registry lock");
    finish(workdir, &records, &handler.failed, &ledger, summary)
}

/// Run a full download. For sensitive projects the private key is fetched
/// first; that call is slow on the server side, so the caller should show a
/// waiting indicator around this function's start.
pub async fn run_download(
    api: ApiClient,
    workdir: &WorkDir,
    options: DownloadOptions,
    cancel: CancellationToken,
    on_complete: impl FnMut(&str),
) -> Result<RunReport> {
    let sensitive = api.project_public().await?.sensitive;
    let project_private = if sensitive {
        info!("fetching project private key (this can take a while)");
        let response = api.project_private().await.context("fetching private key")?;
        Some(ProjectPrivateKey::from_hex(&response.private)?)
    } else {
        None
    };

    let handler =
        resolve_download_files(&api, &options.paths, options.get_all, &options.destination)
            .await?;
    info!(
        project = api.project(),
        files = handler.files.len(),
        not_found = handler.failed.len(),
        "download set resolved"
    );

    let ledger = Arc::new(Ledger::new());
    let keys: Vec<String> = handler.files.keys().cloned().collect();
    for key in &keys {
        ledger.register(key);
    }
    let registry = Arc::new(Mutex::new(handler.files));

    let ctx = Arc::new(DownloadContext {
        api,
        staging_root: workdir.files(),
        project_private,
        verify_checksum: options.verify_checksum,
        cancel: cancel.clone(),
        ledger: ledger.clone(),
        registry: registry.clone(),
    });

    let jobs: Vec<_> = keys
        .into_iter()
        .map(|key| {
            let ctx = ctx.clone();
            (key.clone(), download_one(ctx, key))
        })
        .collect();
    let summary = run_pool(
        jobs,
        options.workers,
        options.break_on_fail,
        cancel,
        ledger.clone(),
        on_complete,
    )
    .await;

    let records = registry.lock().expect("registry lock");
    finish(workdir, &records, &handler.failed, &ledger, summary)
}

fn finish<T: serde::Serialize>(
    workdir: &WorkDir,
    records: &BTreeMap<String, T>,
    prepool_failed: &BTreeMap<String, String>,
    ledger: &Ledger,
    summary: PoolSummary,
) -> Result<RunReport> {
    log_failure_summary(ledger);
    let failed_log_path = workdir.failed_log_path();
    let failed_log_written =
        write_failure_log(&failed_log_path, records, prepool_failed, ledger)?;
    Ok(RunReport {
        summary,
        failed_log_written,
        failed_log_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(serde::Serialize)]
    struct Rec {
        name: String,
    }

    #[test]
    fn finish_writes_report_from_locked_registry() {
        let tmp = TempDir::new().unwrap();
        let workdir = WorkDir::create(tmp.path()).unwrap();

        let ledger = Ledger::new();
        ledger.register("data/a.txt");
        ledger.try_start("data/a.txt");
        ledger.fail("data/a.txt", "put", "connection reset");

        let mut files = BTreeMap::new();
        files.insert("data/a.txt".to_string(), Rec { name: "data/a.txt".into() });
        let registry = Arc::new(Mutex::new(files));

        // Same shape as the run tails: guard bound to a local, then reported.
        let records = registry.lock().expect("registry lock");
        let report = finish(
            &workdir,
            &records,
            &BTreeMap::new(),
            &ledger,
            PoolSummary { delivered: 0, failed: 1, cancelled: 0 },
        )
        .unwrap();

        assert!(report.failed_log_written);
        assert!(report.failed_log_path.exists());
        assert_eq!(report.summary.failed, 1);
    }

    #[test]
    fn finish_without_failures_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let workdir = WorkDir::create(tmp.path()).unwrap();

        let ledger = Ledger::new();
        ledger.register("a");
        ledger.try_start("a");
        ledger.finish("a");

        let registry: Arc<Mutex<BTreeMap<String, Rec>>> = Arc::new(Mutex::new(BTreeMap::new()));
        let records = registry.lock().expect("registry lock");
        let report = finish(
            &workdir,
            &records,
            &BTreeMap::new(),
            &ledger,
            PoolSummary { delivered: 1, failed: 0, cancelled: 0 },
        )
        .unwrap();

        assert!(!report.failed_log_written);
        assert!(!report.failed_log_path.exists());
    }
}
