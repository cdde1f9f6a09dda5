//! Cross-task per-file status ledger
//!
//! One record per file, every mutation under the ledger lock. Orchestrators
//! are the only writers; the pool driver and the final reporter read. The
//! terminal state is a sum type, so "cancelled stays cancelled" and "done
//! requires started" are transition rules rather than conventions.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Protocol stage names tracked per file.
pub const STAGE_PUT: &str = "put";
pub const STAGE_ADD_FILE_DB: &str = "add_file_db";
pub const STAGE_GET: &str = "get";
pub const STAGE_UPDATE_DB: &str = "update_db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileState {
    Pending,
    Running,
    Done,
    Failed { failed_op: String, message: String },
    Cancelled { message: String },
}

impl FileState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileState::Done | FileState::Failed { .. } | FileState::Cancelled { .. })
    }

    /// Failed or cancelled; what the failure report collects.
    pub fn is_unsuccessful(&self) -> bool {
        matches!(self, FileState::Failed { .. } | FileState::Cancelled { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageStatus {
    pub started: bool,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileStatus {
    /// Flattened so a report entry reads `{"state": "failed", "failed_op": …}`
    /// whether it came from the ledger or from a pre-pool failure.
    #[serde(flatten)]
    pub state: FileState,
    pub stages: BTreeMap<&'static str, StageStatus>,
}

impl FileStatus {
    fn new() -> Self {
        Self {
            state: FileState::Pending,
            stages: BTreeMap::new(),
        }
    }
}

/// The mutex-protected name → status map shared by a run.
#[derive(Debug, Default)]
pub struct Ledger {
    inner: Mutex<BTreeMap<String, FileStatus>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file in `Pending`. A second registration of the same name is a
    /// driver bug; the existing record wins.
    pub fn register(&self, name: &str) {
        let mut map = self.inner.lock().expect("ledger lock");
        if map.contains_key(name) {
            tracing::error!(file = name, "file registered twice in one run");
            return;
        }
        map.insert(name.to_string(), FileStatus::new());
    }

    /// `Pending → Running`. Returns false when the file was already cancelled
    /// (the worker must exit without touching it).
    pub fn try_start(&self, name: &str) -> bool {
        let mut map = self.inner.lock().expect("ledger lock");
        match map.get_mut(name) {
            Some(status) if status.state == FileState::Pending => {
                status.state = FileState::Running;
                true
            }
            _ => false,
        }
    }

    pub fn stage_started(&self, name: &str, stage: &'static str) {
        let mut map = self.inner.lock().expect("ledger lock");
        if let Some(status) = map.get_mut(name) {
            status.stages.entry(stage).or_default().started = true;
        }
    }

    /// Marks a stage done; refused unless that stage started earlier for the
    /// same record.
    pub fn stage_done(&self, name: &str, stage: &'static str) {
        let mut map = self.inner.lock().expect("ledger lock");
        if let Some(status) = map.get_mut(name) {
            match status.stages.get_mut(stage) {
                Some(s) if s.started => s.done = true,
                _ => tracing::error!(file = name, stage, "stage done without start"),
            }
        }
    }

    /// `Running → Done`. Terminal states are never overwritten.
    pub fn finish(&self, name: &str) {
        let mut map = self.inner.lock().expect("ledger lock");
        if let Some(status) = map.get_mut(name) {
            if !status.state.is_terminal() {
                status.state = FileState::Done;
            }
        }
    }

    /// Record a terminal failure with the stage that caused it.
    pub fn fail(&self, name: &str, failed_op: &str, message: &str) {
        let mut map = self.inner.lock().expect("ledger lock");
        if let Some(status) = map.get_mut(name) {
            if !status.state.is_terminal() {
                status.state = FileState::Failed {
                    failed_op: failed_op.to_string(),
                    message: message.to_string(),
                };
            }
        }
    }

    /// Cancel a not-yet-finished file. Cancellation is sticky: a cancelled
    /// record never becomes uncancelled, and terminal states stand.
    pub fn cancel(&self, name: &str, message: &str) {
        let mut map = self.inner.lock().expect("ledger lock");
        if let Some(status) = map.get_mut(name) {
            if !status.state.is_terminal() {
                status.state = FileState::Cancelled {
                    message: message.to_string(),
                };
            }
        }
    }

    pub fn state_of(&self, name: &str) -> Option<FileState> {
        self.inner
            .lock()
            .expect("ledger lock")
            .get(name)
            .map(|s| s.state.clone())
    }

    pub fn snapshot(&self) -> BTreeMap<String, FileStatus> {
        self.inner.lock().expect("ledger lock").clone()
    }

    /// Failed and cancelled entries, sorted by file path.
    pub fn unsuccessful(&self) -> BTreeMap<String, FileStatus> {
        self.inner
            .lock()
            .expect("ledger lock")
            .iter()
            .filter(|(_, s)| s.state.is_unsuccessful())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.inner
            .lock()
            .expect("ledger lock")
            .values()
            .any(|s| s.state.is_unsuccessful())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_upload_lifecycle() {
        let ledger = Ledger::new();
        ledger.register("a.txt");
        assert!(ledger.try_start("a.txt"));

        ledger.stage_started("a.txt", STAGE_PUT);
        ledger.stage_done("a.txt", STAGE_PUT);
        ledger.stage_started("a.txt", STAGE_ADD_FILE_DB);
        ledger.stage_done("a.txt", STAGE_ADD_FILE_DB);
        ledger.finish("a.txt");

        let status = &ledger.snapshot()["a.txt"];
        assert_eq!(status.state, FileState::Done);
        assert!(status.stages[STAGE_PUT].done);
        assert!(status.stages[STAGE_ADD_FILE_DB].done);
        assert!(!ledger.has_failures());
    }

    #[test]
    fn done_requires_started() {
        let ledger = Ledger::new();
        ledger.register("a");
        ledger.try_start("a");
        ledger.stage_done("a", STAGE_PUT);
        let status = &ledger.snapshot()["a"];
        assert!(!status.stages.get(STAGE_PUT).map(|s| s.done).unwrap_or(false));
    }

    #[test]
    fn cancelled_is_sticky() {
        let ledger = Ledger::new();
        ledger.register("a");
        ledger.cancel("a", "KeyboardInterrupt");
        assert!(!ledger.try_start("a"), "cancelled file must not start");
        ledger.finish("a");
        assert!(matches!(
            ledger.state_of("a").unwrap(),
            FileState::Cancelled { .. }
        ));
    }

    #[test]
    fn failure_preserved_over_later_transitions() {
        let ledger = Ledger::new();
        ledger.register("a");
        ledger.try_start("a");
        ledger.fail("a", STAGE_PUT, "connection reset");
        ledger.finish("a");
        match ledger.state_of("a").unwrap() {
            FileState::Failed { failed_op, message } => {
                assert_eq!(failed_op, STAGE_PUT);
                assert_eq!(message, "connection reset");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn double_registration_keeps_first() {
        let ledger = Ledger::new();
        ledger.register("a");
        ledger.try_start("a");
        ledger.register("a");
        assert_eq!(ledger.state_of("a").unwrap(), FileState::Running);
    }

    #[test]
    fn unsuccessful_is_sorted_and_filtered() {
        let ledger = Ledger::new();
        for name in ["c", "a", "b"] {
            ledger.register(name);
        }
        ledger.try_start("b");
        ledger.finish("b");
        ledger.fail("c", STAGE_GET, "404");
        ledger.cancel("a", "KeyboardInterrupt");

        let failed = ledger.unsuccessful();
        let keys: Vec<_> = failed.keys().cloned().collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn status_serializes_flat() {
        let ledger = Ledger::new();
        ledger.register("a");
        ledger.try_start("a");
        ledger.stage_started("a", STAGE_GET);
        ledger.fail("a", STAGE_GET, "connection reset");

        let v = serde_json::to_value(&ledger.snapshot()["a"]).unwrap();
        assert_eq!(v["state"], "failed");
        assert_eq!(v["failed_op"], "get");
        assert_eq!(v["message"], "connection reset");
        assert_eq!(v["stages"]["get"]["started"], true);
    }
}
