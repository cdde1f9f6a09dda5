//! The authenticated HTTP client

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use datalift_core::API_TIMEOUT_SECS;

use crate::models::*;

/// Project-scoped control-plane client. Cheap to clone; the underlying
/// `reqwest::Client` is connection-pooled and thread-safe.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    project: String,
}

impl ApiClient {
    pub fn new(base_url: &str, token: String, project: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            project,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{endpoint}", self.base_url))
            .bearer_auth(&self.token)
            .query(&[("project", self.project.as_str())])
    }

    /// Upload pre-check: which of `names` does the project already hold?
    pub async fn match_files(
        &self,
        names: &[String],
    ) -> Result<std::collections::BTreeMap<String, String>> {
        let resp = self
            .request(Method::GET, "/file/match")
            .json(&names)
            .send()
            .await
            .context("calling /file/match")?;
        let matched: MatchFilesResponse = into_json(resp).await?;
        Ok(matched.files.unwrap_or_default())
    }

    /// Register a staged file. `overwrite` switches POST (new) to PUT
    /// (replace an existing registration).
    pub async fn register_file(&self, record: &NewFileRequest, overwrite: bool) -> Result<String> {
        let method = if overwrite { Method::PUT } else { Method::POST };
        let resp = self
            .request(method, "/file/new")
            .json(record)
            .send()
            .await
            .with_context(|| format!("registering {}", record.name))?;
        let ack: MessageResponse = into_json(resp).await?;
        Ok(ack.message)
    }

    /// Resolve explicit paths/folders to per-file download metadata.
    pub async fn file_info(&self, paths: &[String]) -> Result<FileInfoResponse> {
        let resp = self
            .request(Method::GET, "/file/info")
            .json(&paths)
            .send()
            .await
            .context("calling /file/info")?;
        into_json(resp).await
    }

    /// Resolve the whole project for `get_all` downloads.
    pub async fn file_info_all(&self) -> Result<FileInfoResponse> {
        let resp = self
            .request(Method::GET, "/file/all/info")
            .send()
            .await
            .context("calling /file/all/info")?;
        into_json(resp).await
    }

    /// Mark a file delivered after a verified download.
    pub async fn update_file(&self, name: &str) -> Result<String> {
        let resp = self
            .request(Method::PUT, "/file/update")
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .with_context(|| format!("marking {name} delivered"))?;
        let ack: MessageResponse = into_json(resp).await?;
        Ok(ack.message)
    }

    /// Project sensitivity flag and public key.
    pub async fn project_public(&self) -> Result<PublicKeyResponse> {
        let resp = self
            .request(Method::GET, "/proj/public")
            .send()
            .await
            .context("calling /proj/public")?;
        into_json(resp).await
    }

    /// Project private key. The server derives this on demand; expect the
    /// call to take a while and surface a waiting indicator to the user.
    pub async fn project_private(&self) -> Result<PrivateKeyResponse> {
        let resp = self
            .request(Method::GET, "/proj/private")
            .send()
            .await
            .context("calling /proj/private")?;
        into_json(resp).await
    }

    /// Object-store endpoint, bucket and credentials for the project.
    pub async fn s3_info(&self) -> Result<S3Info> {
        let resp = self
            .request(Method::GET, "/s3/proj")
            .send()
            .await
            .context("calling /s3/proj")?;
        into_json(resp).await
    }

    /// The shared reqwest client, for presigned-URL downloads.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

/// Decode a 2xx JSON body, or surface the server's `{message}` for non-2xx.
async fn into_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let url = resp.url().path().to_string();
    let body = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        anyhow::bail!("{}", error_message(status, &body, &url));
    }
    serde_json::from_str(&body)
        .with_context(|| format!("malformed JSON from {url} (status {status})"))
}

fn error_message(status: StatusCode, body: &str, url: &str) -> String {
    let detail = serde_json::from_str::<MessageResponse>(body)
        .ok()
        .map(|m| m.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "no message from server".to_string());
    format!("{url} failed ({status}): {detail}")
}
