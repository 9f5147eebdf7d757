//! Batch execution: one thread per task within a batch, a full barrier
//! between batches. Peak concurrent calls to the analysis service never
//! exceed the batch size.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use tracing::warn;

use crate::analysis::{AnalysisError, AnalysisRequest, AnalysisService, RawFinding};
use crate::config::RetryConfig;
use crate::store::StoreError;

/// One unit of work: a whole section or one chunk of it.
#[derive(Debug, Clone)]
pub struct AnalysisTask {
    pub id: String,
    pub section_key: String,
    pub display_name: String,
    pub chunk_index: u64,
    pub chunk_total: u64,
    pub request: AnalysisRequest,
}

/// Outcome of one task; a failed task contributes zero findings.
#[derive(Debug)]
pub struct TaskOutcome {
    pub task_id: String,
    pub section_key: String,
    pub display_name: String,
    pub chunk_index: u64,
    pub findings: Vec<RawFinding>,
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn failed(task: &AnalysisTask, error: String) -> Self {
        Self {
            task_id: task.id.clone(),
            section_key: task.section_key.clone(),
            display_name: task.display_name.clone(),
            chunk_index: task.chunk_index,
            findings: Vec::new(),
            error: Some(error),
        }
    }
}

/// Invoke the service, retrying transient failures up to the configured
/// bound with exponential backoff. Permanent failures are never retried.
pub fn invoke_with_retry(
    service: &dyn AnalysisService,
    request: &AnalysisRequest,
    retry: &RetryConfig,
) -> Result<Vec<RawFinding>, AnalysisError> {
    let mut attempt = 0u32;
    loop {
        match service.analyze(request) {
            Ok(findings) => return Ok(findings),
            Err(err) if err.is_transient() && attempt < retry.max_retries => {
                attempt += 1;
                let delay = retry.backoff_ms.saturating_mul(1u64 << (attempt - 1).min(16));
                warn!(
                    "transient analysis error for {} (attempt {attempt} of {}): {err}; retrying in {delay}ms",
                    request.section_key, retry.max_retries
                );
                thread::sleep(Duration::from_millis(delay));
            }
            Err(err) => return Err(err),
        }
    }
}

/// Run one batch to completion. Every task is invoked on its own thread;
/// `on_outcome` runs on the caller's thread as results arrive, so progress
/// updates stay serialized. A failing task never blocks its batch-mates.
pub fn run_batch(
    tasks: Vec<AnalysisTask>,
    service: Arc<dyn AnalysisService>,
    retry: RetryConfig,
    mut on_outcome: impl FnMut(TaskOutcome) -> Result<(), StoreError>,
) -> Result<(), StoreError> {
    let expected = tasks.len();
    let (tx, rx) = bounded::<TaskOutcome>(expected.max(1));
    let mut handles = Vec::with_capacity(expected);

    for task in tasks {
        let tx = tx.clone();
        let service = service.clone();
        let retry = retry.clone();
        handles.push(thread::spawn(move || {
            let outcome = match invoke_with_retry(service.as_ref(), &task.request, &retry) {
                Ok(findings) => TaskOutcome {
                    task_id: task.id,
                    section_key: task.section_key,
                    display_name: task.display_name,
                    chunk_index: task.chunk_index,
                    findings,
                    error: None,
                },
                Err(err) => TaskOutcome::failed(&task, err.to_string()),
            };
            let _ = tx.send(outcome);
        }));
    }
    drop(tx);

    let mut first_err = None;
    for _ in 0..expected {
        match rx.recv() {
            Ok(outcome) => {
                if first_err.is_none() {
                    if let Err(err) = on_outcome(outcome) {
                        first_err = Some(err);
                    }
                }
            }
            Err(_) => break,
        }
    }
    for handle in handles {
        let _ = handle.join();
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
