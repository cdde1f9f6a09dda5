//! Per-run working directory and staging-file ownership
//!
//! Every run gets a fresh `DataDelivery_<YYYY-MM-DD_HH-MM-SS>/` directory with
//! `files/` (staging), `logs/` and `meta/` underneath. Staging files are owned
//! by a [`StagingFile`] value whose drop removes the file, so a staging
//! artifact cannot outlive its file's terminal status.

use std::path::{Path, PathBuf};

/// Name of the JSON failure log written under `logs/`. Its existence after a
/// run signals a non-zero exit. The name is a contract consumed by the
/// service's support tooling.
pub const FAILED_DELIVERY_LOG: &str = "dds_failed_delivery.json";

/// A per-run working directory.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Create `DataDelivery_<timestamp>/{files,logs,meta}` under `parent`.
    pub fn create(parent: &Path) -> anyhow::Result<Self> {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let root = parent.join(format!("DataDelivery_{stamp}"));
        for sub in ["files", "logs", "meta"] {
            std::fs::create_dir_all(root.join(sub))
                .map_err(|e| anyhow::anyhow!("creating {}/{sub}: {e}", root.display()))?;
        }
        tracing::debug!(root = %root.display(), "working directory created");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Staging area for in-flight file artifacts.
    pub fn files(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn meta(&self) -> PathBuf {
        self.root.join("meta")
    }

    pub fn failed_log_path(&self) -> PathBuf {
        self.logs().join(FAILED_DELIVERY_LOG)
    }
}

/// Owns a staging file on disk; the file is removed when the value drops.
///
/// Call [`StagingFile::keep`] to release ownership without deleting (only
/// meaningful in tests and debugging).
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
    keep: bool,
}

impl StagingFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release ownership; the file survives this value.
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::trace!(path = %self.path.display(), "staging file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staging file")
            }
        }
    }
}
