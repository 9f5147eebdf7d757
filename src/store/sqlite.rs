use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use crate::store::{ProgressStore, RunEvent, RunProgress, RunStatus, StoreError};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(output_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(output_dir)?;
        let conn = Connection::open(output_dir.join("progress.db"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                run_id     TEXT PRIMARY KEY,
                status     TEXT NOT NULL,
                progress   TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS run_events (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id      TEXT NOT NULL,
                section_key TEXT,
                chunk_index INTEGER,
                kind        TEXT NOT NULL,
                message     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ProgressStore for SqliteStore {
    fn upsert(
        &self,
        run_id: &str,
        status: RunStatus,
        progress: &RunProgress,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(progress)?;
        let guard = self.conn.lock().unwrap();
        guard.execute(
            "INSERT INTO runs (run_id, status, progress, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                progress = excluded.progress,
                updated_at = excluded.updated_at",
            params![
                run_id,
                status.to_string(),
                payload,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn append_event(&self, event: &RunEvent) -> Result<(), StoreError> {
        let guard = self.conn.lock().unwrap();
        guard.execute(
            "INSERT INTO run_events (run_id, section_key, chunk_index, kind, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.run_id,
                event.section_key,
                event.chunk_index,
                event.kind,
                event.message,
                event.timestamp
            ],
        )?;
        Ok(())
    }

    fn get_status(&self, run_id: &str) -> Result<Option<(RunStatus, RunProgress)>, StoreError> {
        let guard = self.conn.lock().unwrap();
        let row: Option<(String, String)> = guard
            .query_row(
                "SELECT status, progress FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((status, progress)) => {
                let status: RunStatus = serde_json::from_value(serde_json::Value::String(status))?;
                let progress: RunProgress = serde_json::from_str(&progress)?;
                Ok(Some((status, progress)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SectionStatus;

    #[test]
    fn upsert_and_get_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::open(dir.path()).expect("open");

        let mut progress = RunProgress {
            total: 3,
            completed: 1,
            ..Default::default()
        };
        progress
            .per_section
            .insert("Users".to_string(), SectionStatus::Processing);

        store
            .upsert("run_1", RunStatus::Analyzing, &progress)
            .expect("upsert");
        let (status, read_back) = store
            .get_status("run_1")
            .expect("get")
            .expect("row present");
        assert_eq!(status, RunStatus::Analyzing);
        assert_eq!(read_back.completed, 1);
        assert_eq!(read_back.per_section["Users"], SectionStatus::Processing);
    }

    #[test]
    fn repeated_upsert_keeps_last_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::open(dir.path()).expect("open");

        let progress = RunProgress::default();
        store
            .upsert("run_1", RunStatus::Extracting, &progress)
            .expect("first");
        store
            .upsert("run_1", RunStatus::Extracting, &progress)
            .expect("second");
        let progress = RunProgress {
            completed: 4,
            ..Default::default()
        };
        store
            .upsert("run_1", RunStatus::Completed, &progress)
            .expect("third");

        let (status, read_back) = store.get_status("run_1").expect("get").expect("row");
        assert_eq!(status, RunStatus::Completed);
        assert_eq!(read_back.completed, 4);
    }

    #[test]
    fn unknown_run_returns_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::open(dir.path()).expect("open");
        assert!(store.get_status("nope").expect("get").is_none());
    }

    #[test]
    fn events_are_appended() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::open(dir.path()).expect("open");
        let event = RunEvent::new(
            "run_1",
            Some("Users"),
            Some(2),
            "task_invocation_error",
            "service returned 500",
        );
        store.append_event(&event).expect("append");
        store.append_event(&event).expect("append again");

        let guard = store.conn.lock().unwrap();
        let count: i64 = guard
            .query_row("SELECT COUNT(*) FROM run_events", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 2);
    }
}
