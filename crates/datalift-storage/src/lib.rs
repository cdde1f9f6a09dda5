//! datalift-storage: object-store access
//!
//! Uploads go through an OpenDAL S3 operator built from the project's
//! `/s3/proj` coordinates. Downloads never touch the operator: the control
//! plane hands out presigned URLs which are fetched as opaque HTTPS GETs.
//!
//! Per-object ACLs are not exposed by OpenDAL's S3 service; object privacy is
//! the bucket policy's job. `Cache-Control: no-store` is set on every PUT
//! where the backend supports it.

use std::path::Path;

use anyhow::{Context, Result};
use opendal::Operator;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use datalift_api::S3Info;

/// Buffer size for streaming staging files into the operator.
const UPLOAD_BUF_SIZE: usize = 4 * 1024 * 1024;

/// Build an S3 operator for the project bucket (path-style addressing, which
/// S3-compatible stores like Safespring expect).
pub fn build_operator(info: &S3Info) -> Result<Operator> {
    let builder = opendal::services::S3::default()
        .endpoint(&info.url)
        .region("us-east-1")
        .bucket(&info.bucket)
        .access_key_id(&info.keys.access_key)
        .secret_access_key(&info.keys.secret_key);

    let op = Operator::new(builder)
        .context("creating S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(3)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// Stream a staging file to the object store under `remote_key`.
pub async fn put_object(op: &Operator, remote_key: &str, staging: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::open(staging)
        .await
        .with_context(|| format!("opening staging file {}", staging.display()))?;

    let mut writer = op.writer_with(remote_key);
    if op.info().full_capability().write_with_cache_control {
        writer = writer.cache_control("no-store");
    }
    let mut writer = writer
        .await
        .with_context(|| format!("opening object writer for {remote_key}"))?;

    let mut total = 0u64;
    let mut buf = vec![0u8; UPLOAD_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer
            .write(buf[..n].to_vec())
            .await
            .with_context(|| format!("writing object {remote_key}"))?;
        total += n as u64;
    }
    writer
        .close()
        .await
        .with_context(|| format!("finishing object {remote_key}"))?;

    tracing::debug!(key = %remote_key, bytes = total, "object stored");
    Ok(total)
}

/// Stream a presigned URL into a staging file. Returns bytes fetched.
///
/// A 404 means the control plane and the object store disagree about this
/// file; the message is surfaced verbatim in the failure report.
pub async fn fetch_presigned(http: &reqwest::Client, url: &str, staging: &Path) -> Result<u64> {
    let resp = http
        .get(url)
        .send()
        .await
        .context("starting presigned download")?;

    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        anyhow::bail!("File not found! Please report this");
    }
    let mut resp = resp
        .error_for_status()
        .context("presigned download rejected")?;

    let mut file = tokio::fs::File::create(staging)
        .await
        .with_context(|| format!("creating staging file {}", staging.display()))?;

    let mut total = 0u64;
    while let Some(chunk) = resp.chunk().await.context("reading presigned stream")? {
        file.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    file.flush().await?;

    tracing::debug!(bytes = total, staging = %staging.display(), "object fetched");
    Ok(total)
}
