//! End-of-run failure report
//!
//! Failed and cancelled ledger entries are merged with their file-handler
//! records, sorted by file path, and written as one JSON object keyed by
//! path. The file's existence is the signal for a non-zero exit code.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::ledger::{FileState, Ledger};

/// Write the failure log if anything failed. Returns true when a log was
/// written (i.e. the run must exit non-zero).
pub fn write_failure_log<T: Serialize>(
    path: &Path,
    records: &BTreeMap<String, T>,
    extra_failed: &BTreeMap<String, String>,
    ledger: &Ledger,
) -> Result<bool> {
    let unsuccessful = ledger.unsuccessful();
    if unsuccessful.is_empty() && extra_failed.is_empty() {
        return Ok(false);
    }

    // BTreeMap keeps the report sorted by file path.
    let mut report: BTreeMap<String, serde_json::Value> = BTreeMap::new();

    for (name, status) in &unsuccessful {
        let mut entry = records
            .get(name)
            .and_then(|r| serde_json::to_value(r).ok())
            .unwrap_or_else(|| json!({}));
        entry["status"] = serde_json::to_value(status)?;
        report.insert(name.clone(), entry);
    }
    // Files that never reached the pool (enumeration/pre-check failures).
    for (name, message) in extra_failed {
        report.entry(name.clone()).or_insert_with(|| {
            json!({ "status": { "state": "failed", "failed_op": null, "message": message } })
        });
    }

    let body = serde_json::to_string_pretty(&report)?;
    std::fs::write(path, body)
        .with_context(|| format!("writing failure log {}", path.display()))?;
    warn!(
        failed = report.len(),
        log = %path.display(),
        "delivery finished with failures"
    );
    Ok(true)
}

/// Log a one-line summary per unsuccessful file.
pub fn log_failure_summary(ledger: &Ledger) {
    for (name, status) in ledger.unsuccessful() {
        match &status.state {
            FileState::Failed { failed_op, message } => {
                warn!(file = %name, stage = %failed_op, message = %message, "failed");
            }
            FileState::Cancelled { message } => {
                warn!(file = %name, message = %message, "cancelled");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::STAGE_PUT;
    use tempfile::TempDir;

    #[derive(Serialize)]
    struct Rec {
        name: String,
        size: u64,
    }

    #[test]
    fn no_failures_no_log() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("failed.json");
        let ledger = Ledger::new();
        ledger.register("a");
        ledger.try_start("a");
        ledger.finish("a");

        let wrote =
            write_failure_log::<Rec>(&log, &BTreeMap::new(), &BTreeMap::new(), &ledger).unwrap();
        assert!(!wrote);
        assert!(!log.exists());
    }

    #[test]
    fn failed_entry_merges_record_and_status() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("failed.json");
        let ledger = Ledger::new();
        ledger.register("data/a.txt");
        ledger.try_start("data/a.txt");
        ledger.stage_started("data/a.txt", STAGE_PUT);
        ledger.fail("data/a.txt", STAGE_PUT, "connection reset");

        let mut records = BTreeMap::new();
        records.insert(
            "data/a.txt".to_string(),
            Rec { name: "data/a.txt".into(), size: 42 },
        );

        let wrote = write_failure_log(&log, &records, &BTreeMap::new(), &ledger).unwrap();
        assert!(wrote);

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&log).unwrap()).unwrap();
        let entry = &parsed["data/a.txt"];
        assert_eq!(entry["size"], 42);
        assert_eq!(entry["status"]["state"], "failed");
        assert_eq!(entry["status"]["failed_op"], "put");
        assert_eq!(entry["status"]["stages"]["put"]["started"], true);
        assert_eq!(entry["status"]["stages"]["put"]["done"], false);
    }

    #[test]
    fn prepool_failures_included() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("failed.json");
        let ledger = Ledger::new();

        let mut extra = BTreeMap::new();
        extra.insert("gone.txt".to_string(), "File already uploaded".to_string());

        let wrote =
            write_failure_log::<Rec>(&log, &BTreeMap::new(), &extra, &ledger).unwrap();
        assert!(wrote);
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&log).unwrap()).unwrap();
        assert_eq!(
            parsed["gone.txt"]["status"]["message"],
            "File already uploaded"
        );
    }
}
