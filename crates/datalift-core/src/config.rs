use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Client configuration (loaded from datalift.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Control-plane base URL
    pub base_url: String,
    /// File holding the bearer token (used when DATALIFT_TOKEN is unset)
    pub token_file: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://delivery.example.org/api/v1".into(),
            token_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Concurrent per-file workers (0 = min(32, cpus + 4))
    pub workers: usize,
    /// Cancel all pending files after the first failure
    pub break_on_fail: bool,
    /// Rehash downloaded files against the recorded checksum
    pub verify_checksum: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            break_on_fail: false,
            verify_checksum: true,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        Ok(cfg)
    }

    /// Effective worker count, clamped to 1..=32.
    pub fn effective_workers(&self) -> usize {
        let n = if self.transfer.workers == 0 {
            crate::default_workers()
        } else {
            self.transfer.workers
        };
        n.clamp(1, crate::MAX_WORKERS)
    }
}

/// Resolve the bearer token: DATALIFT_TOKEN env var first, then token_file.
pub fn resolve_token(cfg: &ApiConfig) -> anyhow::Result<String> {
    if let Ok(tok) = std::env::var("DATALIFT_TOKEN") {
        if !tok.trim().is_empty() {
            return Ok(tok.trim().to_string());
        }
    }
    if let Some(path) = &cfg.token_file {
        let tok = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading token file {}: {e}", path.display()))?;
        let tok = tok.trim();
        if !tok.is_empty() {
            return Ok(tok.to_string());
        }
    }
    Err(crate::DeliveryError::Config(
        "no bearer token: set DATALIFT_TOKEN or api.token_file in the config".into(),
    )
    .into())
}
