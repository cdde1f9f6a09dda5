//! datalift-core: shared types for the data-delivery client
//!
//! - `config`: TOML-backed client configuration
//! - `error`: classified per-file error kinds
//! - `workdir`: per-run working directory + staging-file ownership

pub mod config;
pub mod error;
pub mod workdir;

pub use config::{resolve_token, ClientConfig};
pub use error::{DeliveryError, DeliveryResult};
pub use workdir::{StagingFile, WorkDir};

/// Hard cap on the UTF-8 length of a remote object key.
pub const MAX_REMOTE_KEY_BYTES: usize = 1024;

/// Client-side timeout applied to every control-plane call.
pub const API_TIMEOUT_SECS: u64 = 120;

/// Upper bound on concurrent per-file workers.
pub const MAX_WORKERS: usize = 32;

/// Default worker count: `min(32, cpus + 4)`.
pub fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus + 4).min(MAX_WORKERS)
}
