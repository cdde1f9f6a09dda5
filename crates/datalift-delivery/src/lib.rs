//! datalift-delivery: per-file orchestration for upload and download runs
//!
//! - `local` / `remote`: turn user input and control-plane metadata into
//!   per-file records
//! - `upload` / `download`: per-file state machines
//! - `pool`: bounded-parallelism driver with cancellation and break-on-fail
//! - `ledger`: cross-task status records
//! - `report`: the JSON failure log
//! - `run`: whole-run composition consumed by the CLI

pub mod download;
pub mod ledger;
pub mod local;
pub mod pool;
pub mod remote;
pub mod report;
pub mod run;
pub mod upload;

pub use ledger::{FileState, FileStatus, Ledger};
pub use pool::{run_pool, JobError, PoolSummary};
pub use run::{run_download, run_upload, DownloadOptions, RunReport, UploadOptions};
