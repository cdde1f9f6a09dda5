//! datalift: data-delivery client CLI
//!
//! Commands:
//!   put <paths..>  - stage (compress/encrypt), upload, and register files
//!   get <paths..>  - download, decrypt/decompress, and verify files
//!
//! Every run creates a `DataDelivery_<timestamp>/` staging directory in the
//! current working directory; on failure a machine-readable report lands in
//! its `logs/` subdirectory.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use datalift_api::ApiClient;
use datalift_core::{resolve_token, ClientConfig, WorkDir};
use datalift_delivery::{run_download, run_upload, DownloadOptions, RunReport, UploadOptions};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "datalift",
    version,
    about = "Data-delivery client",
    long_about = "datalift: stream files to and from project storage, \
                  compressed, encrypted, and checksummed on the fly"
)]
struct Cli {
    /// Path to datalift.toml configuration file
    #[arg(long, short = 'c', env = "DATALIFT_CONFIG", default_value = "datalift.toml")]
    config: PathBuf,

    /// Project to act on
    #[arg(long, short = 'p', env = "DATALIFT_PROJECT", global = true)]
    project: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "DATALIFT_LOG", default_value = "warn")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "DATALIFT_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload files or directory trees to the project
    Put {
        /// Local paths (files or directories)
        paths: Vec<PathBuf>,

        /// File listing one local path per line (merged with positional paths)
        #[arg(long)]
        source_path_file: Option<PathBuf>,

        /// Replace files the project already holds
        #[arg(long)]
        overwrite: bool,

        /// Concurrent transfers (0 = auto)
        #[arg(long, short = 'w')]
        workers: Option<usize>,

        /// Cancel all pending files after the first failure
        #[arg(long)]
        break_on_fail: bool,
    },

    /// Download files from the project
    Get {
        /// Remote paths (as recorded at upload)
        paths: Vec<String>,

        /// Download everything the project holds (ignores paths)
        #[arg(long, conflicts_with = "paths")]
        get_all: bool,

        /// Destination directory
        #[arg(long, short = 'd', default_value = ".")]
        destination: PathBuf,

        /// Concurrent transfers (0 = auto)
        #[arg(long, short = 'w')]
        workers: Option<usize>,

        /// Cancel all pending files after the first failure
        #[arg(long)]
        break_on_fail: bool,

        /// Skip rehashing downloaded files against the recorded checksum
        #[arg(long)]
        no_verify: bool,
    },
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, &cli.log_format);

    let config = load_config(&cli.config)?;
    let project = cli
        .project
        .context("no project: pass --project or set DATALIFT_PROJECT")?;
    let token = resolve_token(&config.api)?;
    let api = ApiClient::new(&config.api.base_url, token, project)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        project = api.project(),
        "datalift starting"
    );

    let cwd = std::env::current_dir().context("resolving current directory")?;
    let workdir = WorkDir::create(&cwd)?;

    // First Ctrl-C stops admitting new files; in-flight transfers finish.
    let cancel = CancellationToken::new();
    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received: finishing in-flight files, cancelling the rest");
            cancel_signal.cancel();
        }
    });

    let report = match cli.command {
        Commands::Put {
            paths,
            source_path_file,
            overwrite,
            workers,
            break_on_fail,
        } => {
            let options = UploadOptions {
                paths,
                source_path_file,
                overwrite,
                workers: effective_workers(&config, workers),
                break_on_fail: break_on_fail || config.transfer.break_on_fail,
            };
            let pb = make_counter("put");
            let result = run_upload(api, &workdir, options, cancel, |name| {
                pb.set_message(name.to_string());
                pb.inc(1);
            })
            .await;
            pb.finish_and_clear();
            result?
        }
        Commands::Get {
            paths,
            get_all,
            destination,
            workers,
            break_on_fail,
            no_verify,
        } => {
            let options = DownloadOptions {
                paths,
                get_all,
                destination,
                workers: effective_workers(&config, workers),
                break_on_fail: break_on_fail || config.transfer.break_on_fail,
                verify_checksum: config.transfer.verify_checksum && !no_verify,
            };
            let pb = make_counter("get");
            let result = run_download(api, &workdir, options, cancel, |name| {
                pb.set_message(name.to_string());
                pb.inc(1);
            })
            .await;
            pb.finish_and_clear();
            result?
        }
    };

    print_summary(&report)
}

fn print_summary(report: &RunReport) -> Result<()> {
    println!("Delivery complete:");
    println!("  delivered: {} files", report.summary.delivered);
    if report.summary.failed > 0 {
        println!("  failed:    {} files", report.summary.failed);
    }
    if report.summary.cancelled > 0 {
        println!("  cancelled: {} files", report.summary.cancelled);
    }
    if report.failed_log_written {
        anyhow::bail!(
            "not all files were delivered; see {}",
            report.failed_log_path.display()
        );
    }
    Ok(())
}

// ── Config loading ────────────────────────────────────────────────────────────

fn load_config(path: &PathBuf) -> Result<ClientConfig> {
    if path.exists() {
        ClientConfig::load(path)
    } else {
        warn!(
            "config file not found: {}  (using defaults)",
            path.display()
        );
        Ok(ClientConfig::default())
    }
}

/// Worker count: CLI flag > config > auto, clamped either way.
fn effective_workers(config: &ClientConfig, flag: Option<usize>) -> usize {
    match flag {
        Some(n) if n > 0 => n.min(datalift_core::MAX_WORKERS),
        _ => config.effective_workers(),
    }
}

// ── Progress counter ──────────────────────────────────────────────────────────

fn make_counter(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {pos} files done  {msg}")
            .unwrap(),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
