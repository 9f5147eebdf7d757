//! Pipeline driver: extract sections, chunk the oversized ones, then run
//! analysis tasks in fixed-size concurrent batches while the tracker keeps
//! the persisted run state current.

pub mod batch;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::analysis::{AnalysisRequest, AnalysisService, Severity, payload};
use crate::chunk;
use crate::config::Config;
use crate::extract::{self, ExtractError, SectionScanner};
use crate::progress::ProgressTracker;
use crate::report::{FindingsSink, RunSummary};
use crate::source::BlobStore;
use crate::store::{ProgressStore, RunStatus, SectionStatus, StoreError};

use batch::{AnalysisTask, TaskOutcome};

pub struct PipelineOptions {
    pub concurrency: usize,
    pub max_elements_per_chunk: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub final_status: RunStatus,
    pub bytes_scanned: u64,
    pub sections_present: u64,
    pub sections_absent: u64,
    pub chunks_built: u64,
    pub tasks_run: u64,
    pub tasks_failed: u64,
    pub findings_recorded: u64,
}

/// Run the full pipeline for one document. Task-level failures leave the
/// run `completed` with partial results; only unrecoverable conditions
/// (no valid sections, blob-store failure during extraction, payload
/// construction failure, cancellation) end it `failed`. A progress store
/// that cannot be written at all surfaces as a hard error.
pub fn run_pipeline(
    cfg: &Config,
    blob: Arc<dyn BlobStore>,
    service: Arc<dyn AnalysisService>,
    store: Arc<dyn ProgressStore>,
    sink: Box<dyn FindingsSink>,
    cancel_flag: Arc<AtomicBool>,
    opts: PipelineOptions,
) -> Result<PipelineStats> {
    let keys: Vec<String> = cfg.sections.iter().map(|s| s.key.clone()).collect();
    let tracker = ProgressTracker::new(&cfg.run_id, store, &keys)
        .context("progress store unavailable")?;

    let runner = PipelineRunner {
        cfg,
        blob,
        service,
        sink,
        cancel_flag,
        opts,
        tracker,
        sections_present: 0,
        sections_absent: 0,
        chunks_built: 0,
        tasks_run: 0,
        tasks_failed: 0,
        findings_recorded: 0,
        severity_counts: [0; 4],
    };
    runner.run()
}

struct PipelineRunner<'a> {
    cfg: &'a Config,
    blob: Arc<dyn BlobStore>,
    service: Arc<dyn AnalysisService>,
    sink: Box<dyn FindingsSink>,
    cancel_flag: Arc<AtomicBool>,
    opts: PipelineOptions,
    tracker: ProgressTracker,
    sections_present: u64,
    sections_absent: u64,
    chunks_built: u64,
    tasks_run: u64,
    tasks_failed: u64,
    findings_recorded: u64,
    severity_counts: [u64; 4],
}

impl<'a> PipelineRunner<'a> {
    fn run(mut self) -> Result<PipelineStats> {
        let status = self.execute().context("progress store unavailable")?;
        self.finalize(status)
    }

    fn execute(&mut self) -> Result<RunStatus, StoreError> {
        self.tracker.begin_extracting()?;

        let scanner = SectionScanner::default();
        let interval = Duration::from_secs(self.cfg.progress_interval_secs);
        let sections = match extract::extract_all(
            self.blob.as_ref(),
            &self.cfg.sections,
            &scanner,
            &self.tracker,
            &self.cancel_flag,
            interval,
        ) {
            Ok(sections) => sections,
            Err(ExtractError::Cancelled) => {
                self.tracker.record_error(
                    None,
                    None,
                    "cancelled",
                    "run aborted during extraction",
                )?;
                self.tracker.fail("cancelled: run aborted by caller")?;
                return Ok(RunStatus::Failed);
            }
            Err(ExtractError::NoValidSections) => {
                self.tracker.fail("no valid sections found in the document")?;
                return Ok(RunStatus::Failed);
            }
            Err(ExtractError::Store(err)) => return Err(err),
            Err(err) => {
                let msg = format!("extraction failed: {err}");
                self.tracker
                    .record_error(None, None, "store_unavailable", &msg)?;
                self.tracker.fail(&msg)?;
                return Ok(RunStatus::Failed);
            }
        };

        self.sections_present = sections.iter().filter(|s| s.is_present()).count() as u64;
        self.sections_absent = sections.len() as u64 - self.sections_present;

        let (tasks, prefailed) = match self.build_tasks(&sections)? {
            Some(built) => built,
            None => return Ok(RunStatus::Failed),
        };

        let total_tasks = (tasks.len() + prefailed.len()) as u64;
        self.tracker.begin_analyzing(total_tasks)?;
        info!(
            "analysis scheduled: {} tasks across {} sections, concurrency={}",
            total_tasks,
            self.sections_present,
            self.opts.concurrency.max(1)
        );

        let mut remaining: HashMap<String, usize> = HashMap::new();
        for task in &tasks {
            *remaining.entry(task.section_key.clone()).or_insert(0) += 1;
        }
        for outcome in &prefailed {
            *remaining.entry(outcome.section_key.clone()).or_insert(0) += 1;
        }
        for key in remaining.keys() {
            self.tracker.section_status(key, SectionStatus::Processing)?;
        }

        for outcome in prefailed {
            self.handle_outcome(outcome, &mut remaining)?;
        }

        let mut cancelled = false;
        let concurrency = self.opts.concurrency.max(1);
        for batch_tasks in tasks.chunks(concurrency) {
            // No new batch starts after cancellation; in-flight tasks of the
            // current batch always drain first.
            if self.cancel_flag.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }
            let service = self.service.clone();
            let retry = self.cfg.retry.clone();
            batch::run_batch(batch_tasks.to_vec(), service, retry, |outcome| {
                self.handle_outcome(outcome, &mut remaining)
            })?;
        }

        if cancelled {
            self.tracker.record_error(
                None,
                None,
                "cancelled",
                "run aborted before all batches were dispatched",
            )?;
            self.tracker.fail("cancelled: run aborted by caller")?;
            return Ok(RunStatus::Failed);
        }

        self.tracker.complete()?;
        Ok(RunStatus::Completed)
    }

    /// Build one task per chunk, uploading each chunk file along the way.
    /// An upload failure downgrades that one task to a pre-recorded failure;
    /// a payload construction failure fails the run (returns None).
    #[allow(clippy::type_complexity)]
    fn build_tasks(
        &mut self,
        sections: &[extract::ExtractedSection],
    ) -> Result<Option<(Vec<AnalysisTask>, Vec<TaskOutcome>)>, StoreError> {
        let mut tasks = Vec::new();
        let mut prefailed = Vec::new();
        let run_id = self.tracker.run_id().to_string();

        for section in sections {
            let Some(value) = section.value.as_ref() else {
                continue;
            };
            let chunks =
                chunk::build_chunks(&section.spec, value, self.opts.max_elements_per_chunk);
            self.chunks_built += chunks.len() as u64;
            for piece in chunks {
                let built = match payload::build_payload(
                    &section.spec.payload,
                    &piece,
                    self.cfg.max_prompt_chars,
                ) {
                    Ok(built) => built,
                    Err(err) => {
                        let msg = format!(
                            "payload construction failed for {} chunk {}: {err}",
                            piece.section_key, piece.index
                        );
                        self.tracker.record_error(
                            Some(&piece.section_key),
                            Some(piece.index as u64),
                            "payload_error",
                            &msg,
                        )?;
                        self.tracker.fail(&msg)?;
                        return Ok(None);
                    }
                };
                if built.truncated {
                    let msg = format!(
                        "payload truncated to {} chars",
                        self.cfg.max_prompt_chars
                    );
                    warn!(
                        "section {} chunk {}: {msg}",
                        piece.section_key, piece.index
                    );
                    self.tracker.record_error(
                        Some(&piece.section_key),
                        Some(piece.index as u64),
                        "payload_too_large",
                        &msg,
                    )?;
                }

                let task = AnalysisTask {
                    id: format!("{}_{}", piece.section_key, piece.index),
                    section_key: piece.section_key.clone(),
                    display_name: piece.display_name.clone(),
                    chunk_index: piece.index as u64,
                    chunk_total: piece.total as u64,
                    request: AnalysisRequest {
                        section_key: piece.section_key.clone(),
                        display_name: piece.display_name.clone(),
                        chunk_index: piece.index as u64,
                        chunk_total: piece.total as u64,
                        payload: built.text,
                    },
                };

                if !self.opts.dry_run {
                    let path = piece.blob_path(&run_id);
                    let bytes = serde_json::to_vec(&piece.blob_payload())
                        .expect("chunk payload serializes");
                    if let Err(err) = self.blob.put_object(&path, &bytes) {
                        let msg = format!("chunk upload failed for {path}: {err}");
                        warn!("{msg}");
                        prefailed.push(TaskOutcome::failed(&task, msg));
                        continue;
                    }
                }
                tasks.push(task);
            }
        }

        Ok(Some((tasks, prefailed)))
    }

    fn handle_outcome(
        &mut self,
        mut outcome: TaskOutcome,
        remaining: &mut HashMap<String, usize>,
    ) -> Result<(), StoreError> {
        self.tasks_run += 1;
        if let Some(msg) = outcome.error.as_deref() {
            self.tasks_failed += 1;
            warn!(
                "task {} failed (section={} chunk={}): {msg}",
                outcome.task_id, outcome.section_key, outcome.chunk_index
            );
            self.tracker.record_error(
                Some(&outcome.section_key),
                Some(outcome.chunk_index),
                "task_invocation_error",
                msg,
            )?;
        } else {
            for raw in std::mem::take(&mut outcome.findings) {
                let finding = raw.normalize(self.tracker.run_id(), &outcome.section_key);
                match finding.severity {
                    Severity::Critical => self.severity_counts[0] += 1,
                    Severity::High => self.severity_counts[1] += 1,
                    Severity::Medium => self.severity_counts[2] += 1,
                    Severity::Low => self.severity_counts[3] += 1,
                }
                if let Err(err) = self.sink.record_finding(&finding) {
                    warn!("finding write failed: {err}");
                } else {
                    self.findings_recorded += 1;
                }
            }
        }

        self.tracker.task_completed(&outcome.display_name)?;
        if let Some(count) = remaining.get_mut(&outcome.section_key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.tracker
                    .section_status(&outcome.section_key, SectionStatus::Completed)?;
            }
        }
        Ok(())
    }

    fn finalize(self, status: RunStatus) -> Result<PipelineStats> {
        let (_, progress) = self.tracker.snapshot();
        let stats = PipelineStats {
            final_status: status,
            bytes_scanned: progress.bytes_scanned,
            sections_present: self.sections_present,
            sections_absent: self.sections_absent,
            chunks_built: self.chunks_built,
            tasks_run: self.tasks_run,
            tasks_failed: self.tasks_failed,
            findings_recorded: self.findings_recorded,
        };

        let summary = RunSummary {
            run_id: self.tracker.run_id().to_string(),
            bytes_scanned: stats.bytes_scanned,
            sections_present: stats.sections_present,
            sections_absent: stats.sections_absent,
            chunks_built: stats.chunks_built,
            tasks_run: stats.tasks_run,
            tasks_failed: stats.tasks_failed,
            findings_recorded: stats.findings_recorded,
            critical: self.severity_counts[0],
            high: self.severity_counts[1],
            medium: self.severity_counts[2],
            low: self.severity_counts[3],
        };
        if let Err(err) = self.sink.record_summary(&summary) {
            warn!("run summary write failed: {err}");
        }
        if let Err(err) = self.sink.flush() {
            warn!("findings sink flush failed: {err}");
        }

        info!(
            "run_summary run_id={} status={} sections_present={} sections_absent={} chunks_built={} tasks_run={} tasks_failed={} findings_recorded={}",
            summary.run_id,
            status,
            stats.sections_present,
            stats.sections_absent,
            stats.chunks_built,
            stats.tasks_run,
            stats.tasks_failed,
            stats.findings_recorded
        );

        Ok(stats)
    }
}
