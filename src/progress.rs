//! Run-scoped progress accounting. The tracker is the only writer to the
//! progress store for its run; concurrent task completions serialize on its
//! internal mutex, and merges are forward-only so a late or duplicated
//! update can never regress persisted state.

use std::sync::{Arc, Mutex};

use crate::store::{ProgressStore, RunEvent, RunProgress, RunStatus, SectionStatus, StoreError};

fn status_rank(status: RunStatus) -> u8 {
    match status {
        RunStatus::Queued => 0,
        RunStatus::Extracting => 1,
        RunStatus::Analyzing => 2,
        RunStatus::Completed | RunStatus::Failed => 3,
    }
}

struct TrackerState {
    status: RunStatus,
    progress: RunProgress,
}

pub struct ProgressTracker {
    run_id: String,
    store: Arc<dyn ProgressStore>,
    inner: Mutex<TrackerState>,
}

impl ProgressTracker {
    /// Create the run record in `queued` state with every catalog section
    /// pending.
    pub fn new(
        run_id: &str,
        store: Arc<dyn ProgressStore>,
        section_keys: &[String],
    ) -> Result<Self, StoreError> {
        let mut progress = RunProgress::default();
        for key in section_keys {
            progress
                .per_section
                .insert(key.clone(), SectionStatus::Pending);
        }
        store.upsert(run_id, RunStatus::Queued, &progress)?;
        Ok(Self {
            run_id: run_id.to_string(),
            store,
            inner: Mutex::new(TrackerState {
                status: RunStatus::Queued,
                progress,
            }),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn snapshot(&self) -> (RunStatus, RunProgress) {
        let guard = self.inner.lock().unwrap();
        (guard.status, guard.progress.clone())
    }

    pub fn begin_extracting(&self) -> Result<(), StoreError> {
        self.advance(RunStatus::Extracting)
    }

    pub fn begin_analyzing(&self, total_tasks: u64) -> Result<(), StoreError> {
        self.update(|state| {
            if status_rank(RunStatus::Analyzing) > status_rank(state.status) {
                state.status = RunStatus::Analyzing;
            }
            state.progress.total = state.progress.total.max(total_tasks);
            true
        })
    }

    /// Extraction byte progress; counts and totals only move forward.
    pub fn report_bytes(
        &self,
        bytes: u64,
        total_bytes: Option<u64>,
        label: String,
    ) -> Result<(), StoreError> {
        self.update(|state| {
            state.progress.bytes_scanned = state.progress.bytes_scanned.max(bytes);
            if state.progress.total_bytes.is_none() {
                state.progress.total_bytes = total_bytes;
            }
            state.progress.current_label = Some(label);
            true
        })
    }

    /// Advance one section's status; a backward report is a no-op.
    pub fn section_status(&self, key: &str, status: SectionStatus) -> Result<(), StoreError> {
        self.update(|state| {
            let entry = state
                .progress
                .per_section
                .entry(key.to_string())
                .or_insert(SectionStatus::Pending);
            if status.rank() > entry.rank() {
                *entry = status;
                true
            } else {
                false
            }
        })
    }

    /// One task finished (successfully or not).
    pub fn task_completed(&self, label: &str) -> Result<(), StoreError> {
        self.update(|state| {
            state.progress.completed += 1;
            state.progress.current_label = Some(label.to_string());
            true
        })
    }

    /// Merge an externally accumulated completed count; lower counts never
    /// regress the stored value.
    pub fn merge_completed(&self, completed: u64) -> Result<(), StoreError> {
        self.update(|state| {
            if completed > state.progress.completed {
                state.progress.completed = completed;
                true
            } else {
                false
            }
        })
    }

    /// Record a recoverable failure: appended to the event log and surfaced
    /// as the run's most recent error.
    pub fn record_error(
        &self,
        section_key: Option<&str>,
        chunk_index: Option<u64>,
        kind: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        {
            let guard = self.inner.lock().unwrap();
            if guard.status.is_terminal() {
                return Ok(());
            }
        }
        self.store.append_event(&RunEvent::new(
            &self.run_id,
            section_key,
            chunk_index,
            kind,
            message,
        ))?;
        self.update(|state| {
            state.progress.last_error = Some(format!("{kind}: {message}"));
            true
        })
    }

    /// Terminal success. Individual task failures do not prevent this; they
    /// are already reflected in `last_error` and the event log.
    pub fn complete(&self) -> Result<(), StoreError> {
        self.advance(RunStatus::Completed)
    }

    /// Terminal failure with its reason.
    pub fn fail(&self, message: &str) -> Result<(), StoreError> {
        self.update(|state| {
            if state.status.is_terminal() {
                return false;
            }
            state.status = RunStatus::Failed;
            state.progress.last_error = Some(message.to_string());
            true
        })
    }

    fn advance(&self, status: RunStatus) -> Result<(), StoreError> {
        self.update(|state| {
            if status_rank(status) > status_rank(state.status) {
                state.status = status;
                true
            } else {
                false
            }
        })
    }

    /// Apply a merge under the lock and persist when it changed anything.
    /// Writes are rejected once the run is terminal.
    fn update(&self, merge: impl FnOnce(&mut TrackerState) -> bool) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        if guard.status.is_terminal() {
            return Ok(());
        }
        if !merge(&mut guard) {
            return Ok(());
        }
        self.store
            .upsert(&self.run_id, guard.status, &guard.progress)
    }
}
