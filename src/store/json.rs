use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::store::{ProgressStore, RunEvent, RunProgress, RunStatus, StoreError};

/// File-backed store: one status document per run, events appended to a
/// JSONL log next to it.
pub struct JsonStore {
    state_dir: PathBuf,
    lock: Mutex<()>,
}

#[derive(Serialize, Deserialize)]
struct StatusDocument {
    run_id: String,
    status: RunStatus,
    progress: RunProgress,
    updated_at: String,
}

impl JsonStore {
    pub fn open(output_dir: &Path) -> Result<Self, StoreError> {
        let state_dir = output_dir.join("state");
        std::fs::create_dir_all(&state_dir)?;
        Ok(Self {
            state_dir,
            lock: Mutex::new(()),
        })
    }

    fn status_path(&self, run_id: &str) -> PathBuf {
        self.state_dir.join(format!("{run_id}.json"))
    }

    fn events_path(&self, run_id: &str) -> PathBuf {
        self.state_dir.join(format!("{run_id}.events.jsonl"))
    }
}

impl ProgressStore for JsonStore {
    fn upsert(
        &self,
        run_id: &str,
        status: RunStatus,
        progress: &RunProgress,
    ) -> Result<(), StoreError> {
        let document = StatusDocument {
            run_id: run_id.to_string(),
            status,
            progress: progress.clone(),
            updated_at: chrono::Utc::now().to_rfc3339(),
        };
        let text = serde_json::to_string_pretty(&document)?;
        let _guard = self.lock.lock().unwrap();
        std::fs::write(self.status_path(run_id), text)?;
        Ok(())
    }

    fn append_event(&self, event: &RunEvent) -> Result<(), StoreError> {
        let line = serde_json::to_string(event)?;
        let _guard = self.lock.lock().unwrap();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path(&event.run_id))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    fn get_status(&self, run_id: &str) -> Result<Option<(RunStatus, RunProgress)>, StoreError> {
        let path = self.status_path(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let _guard = self.lock.lock().unwrap();
        let text = std::fs::read_to_string(path)?;
        let document: StatusDocument = serde_json::from_str(&text)?;
        Ok(Some((document.status, document.progress)))
    }
}
