//! Persisted scheduler state.
//!
//! Everything is a versioned JSON snapshot written atomically
//! (temp file + rename) so a crash mid-write never corrupts state.
//! Missing files load as defaults; parse failures surface as
//! [`SchedulerError::Persistence`] for callers to log and skip.

use crate::battery::BatteryMode;
use crate::budget::TimeBudgetSnapshot;
use crate::doze::DozeRecord;
use crate::error::{Result, SchedulerError};
use crate::scheduler::tasks::{BackgroundTask, ExecutionResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persisted scheduler state: task registry, run history, active battery
/// mode, budget and Doze record. The network-batch queue persists to its
/// own file beside this one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerState {
    /// Schema version.
    #[serde(default = "default_state_version")]
    pub version: u8,
    /// Task registry.
    #[serde(default)]
    pub tasks: Vec<BackgroundTask>,
    /// Bounded execution-result history.
    #[serde(default)]
    pub history: Vec<ExecutionResult>,
    /// Active battery mode at last save.
    #[serde(default)]
    pub battery_mode: BatteryMode,
    /// Time-budget snapshot, absent in pre-budget state files.
    #[serde(default)]
    pub budget: Option<TimeBudgetSnapshot>,
    /// Doze transition record.
    #[serde(default)]
    pub doze: DozeRecord,
}

fn default_state_version() -> u8 {
    1
}

impl SchedulerState {
    /// A fresh state at the current schema version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: default_state_version(),
            ..Self::default()
        }
    }
}

/// Default directory for persisted state (`<config dir>/lowtide`).
#[must_use]
pub fn default_state_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lowtide"))
}

/// Default path for the scheduler state file.
#[must_use]
pub fn default_state_path() -> Option<PathBuf> {
    default_state_dir().map(|dir| dir.join("scheduler.json"))
}

/// Default path for the network-batch queue file.
#[must_use]
pub fn default_queue_path() -> Option<PathBuf> {
    default_state_dir().map(|dir| dir.join("batch_queue.json"))
}

/// Load the scheduler state from `path`. A missing file is a fresh state.
pub fn load_state(path: &Path) -> Result<SchedulerState> {
    read_json(path).map(|loaded: Option<SchedulerState>| loaded.unwrap_or_else(SchedulerState::new))
}

/// Save the scheduler state to `path`.
pub fn save_state(path: &Path, state: &SchedulerState) -> Result<()> {
    write_json_atomic(path, state)
}

/// Read a JSON value from `path`; `Ok(None)` when the file does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(SchedulerError::Persistence(format!(
                "cannot read {}: {e}",
                path.display()
            )));
        }
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| SchedulerError::Persistence(format!("cannot parse {}: {e}", path.display())))
}

/// Write a JSON value to `path` via temp file + rename.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            SchedulerError::Persistence(format!("cannot create state dir: {e}"))
        })?;
    }

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| SchedulerError::Persistence(format!("cannot serialize state: {e}")))?;

    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json).map_err(|e| {
        SchedulerError::Persistence(format!("cannot write {}: {e}", tmp_path.display()))
    })?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        SchedulerError::Persistence(format!("cannot finalize {}: {e}", path.display()))
    })?;
    Ok(())
}
