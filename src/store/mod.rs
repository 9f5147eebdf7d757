//! Progress/state persistence: one status record per run plus a structured
//! event log, behind a backend-agnostic trait.

pub mod json;
pub mod sqlite;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Extracting,
    Analyzing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::Extracting => "extracting",
            RunStatus::Analyzing => "analyzing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Pending,
    Processing,
    Completed,
}

impl SectionStatus {
    /// Ordering used by the forward-only merge.
    pub fn rank(self) -> u8 {
        match self {
            SectionStatus::Pending => 0,
            SectionStatus::Processing => 1,
            SectionStatus::Completed => 2,
        }
    }
}

/// The structured progress payload persisted alongside the run status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunProgress {
    pub total: u64,
    pub completed: u64,
    pub bytes_scanned: u64,
    pub total_bytes: Option<u64>,
    pub current_label: Option<String>,
    pub last_error: Option<String>,
    pub per_section: BTreeMap<String, SectionStatus>,
}

/// One audit-log entry: recoverable failures and notable events, keyed by
/// run/section/chunk so a partial-failure run can be reconstructed later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: String,
    pub section_key: Option<String>,
    pub chunk_index: Option<u64>,
    pub kind: String,
    pub message: String,
    pub timestamp: String,
}

impl RunEvent {
    pub fn new(
        run_id: &str,
        section_key: Option<&str>,
        chunk_index: Option<u64>,
        kind: &str,
        message: &str,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            section_key: section_key.map(str::to_string),
            chunk_index,
            kind: kind.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Run-scoped persistence boundary. `upsert` is idempotent: re-writing the
/// same monotonic state is a no-op beyond the last write.
pub trait ProgressStore: Send + Sync {
    fn upsert(&self, run_id: &str, status: RunStatus, progress: &RunProgress)
    -> Result<(), StoreError>;
    fn append_event(&self, event: &RunEvent) -> Result<(), StoreError>;
    fn get_status(&self, run_id: &str) -> Result<Option<(RunStatus, RunProgress)>, StoreError>;
}

/// A no-op store for dry runs.
pub struct NullStore;

impl ProgressStore for NullStore {
    fn upsert(
        &self,
        _run_id: &str,
        _status: RunStatus,
        _progress: &RunProgress,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    fn append_event(&self, _event: &RunEvent) -> Result<(), StoreError> {
        Ok(())
    }

    fn get_status(&self, _run_id: &str) -> Result<Option<(RunStatus, RunProgress)>, StoreError> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum StoreBackendKind {
    Sqlite,
    Json,
}

pub fn build_store(
    backend: StoreBackendKind,
    output_dir: &Path,
) -> Result<Box<dyn ProgressStore>, StoreError> {
    match backend {
        StoreBackendKind::Sqlite => Ok(Box::new(sqlite::SqliteStore::open(output_dir)?)),
        StoreBackendKind::Json => Ok(Box::new(json::JsonStore::open(output_dir)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_status_ranks_advance() {
        assert!(SectionStatus::Pending.rank() < SectionStatus::Processing.rank());
        assert!(SectionStatus::Processing.rank() < SectionStatus::Completed.rank());
    }

    #[test]
    fn run_status_terminality() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Analyzing.is_terminal());
        assert_eq!(RunStatus::Extracting.to_string(), "extracting");
    }

    #[test]
    fn progress_serializes_round_trip() {
        let mut progress = RunProgress {
            total: 5,
            completed: 2,
            ..Default::default()
        };
        progress
            .per_section
            .insert("Users".to_string(), SectionStatus::Processing);
        let text = serde_json::to_string(&progress).expect("serialize");
        let back: RunProgress = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back.completed, 2);
        assert_eq!(back.per_section["Users"], SectionStatus::Processing);
    }
}
